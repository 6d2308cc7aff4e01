// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-context
//!
//! An emulated OpenCL device for the clrt runtime.
//!
//! The device mirrors a Mali GPU with unified memory: buffers live in host
//! memory, so mapping never copies, and commands run on the host when the
//! in-order queue is flushed. Everything the runtime relies on is kept
//! observable:
//!
//! - **Capabilities** ([`DeviceOptions`]) parsed once from the strings a
//!   driver reports ([`DeviceProperties`]).
//! - **Memory accounting** in [`ClContext`]: allocations fail when the
//!   device's global memory would be exceeded.
//! - **Queue ordering** in [`CommandQueue`]: non-blocking maps are not
//!   ready until the queue runs, unmaps return an [`Event`] fence.
//!
//! # Example
//! ```
//! use device_context::{ClContext, DeviceOptions, MemFlags};
//!
//! let ctx = ClContext::new(DeviceOptions::default());
//! let queue = ctx.create_queue();
//! let buf = ctx.create_buffer(MemFlags::ReadWrite, 16).unwrap();
//!
//! let mapping = queue.enqueue_map(&buf, true);
//! mapping.bytes()[0] = 1;
//! let fence = queue.enqueue_unmap(mapping);
//! fence.wait();
//! assert_eq!(buf.to_vec()[0], 1);
//! ```

mod buffer;
mod context;
mod error;
mod options;
mod queue;

pub use buffer::{BufferBytes, DeviceBuffer, MemFlags};
pub use context::ClContext;
pub use error::ClError;
pub use options::{ClVersion, DeviceOptions, DeviceProperties, GpuArch, GpuTarget};
pub use queue::{CommandQueue, DispatchRecord, Event, HostMapping, NdRange};
