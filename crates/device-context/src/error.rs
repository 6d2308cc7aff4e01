// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device-level error types.

/// Errors reported by the emulated device.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClError {
    /// A buffer of zero bytes was requested.
    #[error("invalid buffer size: {0} bytes")]
    InvalidBufferSize(usize),

    /// The allocation would exceed the device's global memory.
    #[error("device out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    /// The requested element count does not fit in a byte size.
    #[error("buffer of {count} elements of {elem} bytes overflows usize")]
    SizeOverflow { count: usize, elem: usize },

    /// A sub-buffer range does not fit inside its parent buffer.
    #[error("sub-buffer [{offset}, {offset}+{size}) exceeds parent of {parent} bytes")]
    InvalidSubBuffer {
        offset: usize,
        size: usize,
        parent: usize,
    },

    /// A host transfer touched bytes outside the buffer.
    #[error("transfer of {len} bytes at offset {offset} exceeds buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// A program could not be built for this device.
    #[error("failed to build program '{program}': {detail}")]
    BuildProgram { program: String, detail: String },
}
