// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The emulated device context.
//!
//! A [`ClContext`] owns the device capability snapshot and accounts for
//! every byte of device memory currently alive. Buffers are backed by host
//! memory (unified memory, as on Mali), and are released from the
//! accounting when the last handle to their storage is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::{DeviceBuffer, MemFlags, Storage};
use crate::{ClError, CommandQueue, DeviceOptions};

pub(crate) struct ContextInner {
    options: DeviceOptions,
    allocated: AtomicUsize,
    peak: AtomicUsize,
    live_buffers: AtomicUsize,
    next_id: AtomicUsize,
}

impl ContextInner {
    pub(crate) fn release(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::Relaxed);
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared handle to an emulated OpenCL context.
///
/// Cloning is cheap; all clones refer to the same device and memory
/// accounting.
#[derive(Clone)]
pub struct ClContext {
    inner: Arc<ContextInner>,
}

impl ClContext {
    /// Creates a context for a device with the given capabilities.
    pub fn new(options: DeviceOptions) -> Self {
        tracing::info!(
            device = %options.name,
            global_mem_mb = options.global_mem_size / (1024 * 1024),
            "created device context"
        );
        Self {
            inner: Arc::new(ContextInner {
                options,
                allocated: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                live_buffers: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
            }),
        }
    }

    /// The device capability snapshot taken at creation.
    pub fn options(&self) -> &DeviceOptions {
        &self.inner.options
    }

    /// Creates a new in-order command queue on this context.
    pub fn create_queue(&self) -> CommandQueue {
        CommandQueue::new(self.clone())
    }

    /// Allocates `size` bytes of zero-initialised device memory.
    ///
    /// # Errors
    /// - [`ClError::InvalidBufferSize`] when `size` is zero.
    /// - [`ClError::OutOfMemory`] when the device's global memory would be
    ///   exceeded.
    pub fn create_buffer(&self, flags: MemFlags, size: usize) -> Result<DeviceBuffer, ClError> {
        if size == 0 {
            return Err(ClError::InvalidBufferSize(size));
        }

        let capacity = self.inner.options.global_mem_size;
        self.inner
            .allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let new = current.checked_add(size)?;
                (new <= capacity).then_some(new)
            })
            .map_err(|current| ClError::OutOfMemory {
                requested: size,
                available: capacity.saturating_sub(current),
            })?;

        let total = self.inner.allocated.load(Ordering::Relaxed);
        self.inner.peak.fetch_max(total, Ordering::Relaxed);
        self.inner.live_buffers.fetch_add(1, Ordering::Relaxed);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(id, size, ?flags, allocated = total, "device buffer created");
        let storage = Storage::new(id, size, Arc::clone(&self.inner));
        Ok(DeviceBuffer::from_storage(Arc::new(storage), flags))
    }

    /// Bytes of device memory currently alive.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Highest value [`Self::allocated_bytes`] has reached.
    pub fn peak_bytes(&self) -> usize {
        self.inner.peak.load(Ordering::Relaxed)
    }

    /// Number of device storages currently alive.
    pub fn live_buffers(&self) -> usize {
        self.inner.live_buffers.load(Ordering::Relaxed)
    }

    /// Bytes of device memory still available.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .options
            .global_mem_size
            .saturating_sub(self.allocated_bytes())
    }
}

impl std::fmt::Debug for ClContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClContext")
            .field("device", &self.inner.options.name)
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}
