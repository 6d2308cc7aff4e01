// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the compute runtime.

use crate::TensorSlot;

/// Errors returned by allocation, configuration and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A `validate()` check rejected the configuration.
    #[error("validation failed: {0}")]
    Validation(#[from] tensor_core::TensorError),

    /// The device refused a buffer or program operation.
    #[error("device error: {0}")]
    Device(#[from] device_context::ClError),

    /// The memory pool or a memory group failed.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// A kernel was run without a tensor bound to one of its slots.
    #[error("kernel '{kernel}': no tensor bound to slot {slot:?}")]
    MissingTensor { kernel: String, slot: TensorSlot },

    /// A tensor bound to a kernel has no backing memory: it was never
    /// allocated, or its memory group is not acquired.
    #[error("kernel '{kernel}': tensor in slot {slot:?} has no backing memory")]
    UnallocatedTensor { kernel: String, slot: TensorSlot },

    /// The kernel library does not know the requested kernel.
    #[error("unknown kernel '{0}'")]
    KernelNotFound(String),

    /// The global allocator can only be installed once, before any
    /// tensor has been allocated.
    #[error("global allocator already set or already in use")]
    GlobalAllocatorAlreadySet,

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
