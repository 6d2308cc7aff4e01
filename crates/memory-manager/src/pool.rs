// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budgeted pool of device memory blobs.
//!
//! The [`BlobPool`] backs memory groups. It:
//!
//! 1. Enforces a budget on live pooled bytes, on top of the device's own
//!    capacity.
//! 2. Keeps returned blobs in a free list binned by power-of-two size
//!    class, so groups that are acquired and released every iteration do
//!    not create device buffers each time.
//! 3. Tracks [`AllocationStats`].
//!
//! A blob is created with the full capacity of its size class; the guard
//! exposes only the requested prefix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use device_context::{ClContext, DeviceBuffer, MemFlags};

use crate::{AllocationStats, BlobGuard, MemoryBudget, MemoryError};

/// Smallest size class. Requests below it are rounded up.
const MIN_SIZE_CLASS: usize = 256;

/// State shared between the pool and its guards.
pub(crate) struct PoolInner {
    context: ClContext,
    budget: MemoryBudget,
    /// Capacity of all blobs currently handed out.
    allocated_bytes: AtomicUsize,
    /// size class → returned blobs.
    free_blobs: Mutex<HashMap<usize, Vec<DeviceBuffer>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
}

impl PoolInner {
    /// Called by `BlobGuard::drop`.
    pub(crate) fn return_blob(&self, blob: DeviceBuffer) {
        let capacity = blob.size();
        self.allocated_bytes.fetch_sub(capacity, Ordering::Release);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_return();
        }

        self.free_list_bytes.fetch_add(capacity, Ordering::Release);
        if let Ok(mut free) = self.free_blobs.lock() {
            free.entry(capacity).or_default().push(blob);
        }
    }
}

/// Pool of device blobs shared by memory groups.
///
/// Cloning yields another handle to the same pool.
///
/// # Example
/// ```
/// use device_context::{ClContext, DeviceOptions};
/// use memory_manager::{BlobPool, MemoryBudget};
///
/// let ctx = ClContext::new(DeviceOptions::default());
/// let pool = BlobPool::new(ctx, MemoryBudget::from_mb(1));
///
/// let blob = pool.allocate(1000).unwrap();
/// assert_eq!(blob.size_bytes(), 1000);
/// assert_eq!(pool.allocated_bytes(), 1024);
///
/// drop(blob);
/// assert_eq!(pool.allocated_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct BlobPool {
    inner: Arc<PoolInner>,
}

impl BlobPool {
    pub fn new(context: ClContext, budget: MemoryBudget) -> Self {
        tracing::debug!(%budget, "created blob pool");
        Self {
            inner: Arc::new(PoolInner {
                context,
                budget,
                allocated_bytes: AtomicUsize::new(0),
                free_blobs: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    /// Hands out a zeroed blob of at least `size_bytes`.
    ///
    /// A returned blob of the same size class is reused when available;
    /// otherwise a new device buffer is created.
    pub fn allocate(&self, size_bytes: usize) -> Result<BlobGuard, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let class = size_class_for(size_bytes);

        let current = self.inner.allocated_bytes.load(Ordering::Acquire);
        let budget = self.inner.budget.as_bytes();
        if current.saturating_add(class) > budget {
            self.record_oom();
            return Err(MemoryError::OutOfMemory {
                requested_bytes: class,
                available_bytes: budget.saturating_sub(current),
                budget_bytes: budget,
            });
        }

        let recycled = self
            .inner
            .free_blobs
            .lock()
            .ok()
            .and_then(|mut free| free.get_mut(&class).and_then(Vec::pop));

        let reused = recycled.is_some();
        let blob = match recycled {
            Some(blob) => {
                self.inner.free_list_bytes.fetch_sub(class, Ordering::Release);
                blob.fill(0);
                blob
            }
            None => match self.inner.context.create_buffer(MemFlags::ReadWrite, class) {
                Ok(blob) => blob,
                Err(e) => {
                    self.record_oom();
                    return Err(e.into());
                }
            },
        };

        let live = self.inner.allocated_bytes.fetch_add(class, Ordering::AcqRel) + class;
        if let Ok(mut stats) = self.inner.stats.lock() {
            if reused {
                stats.record_reuse(size_bytes);
            } else {
                stats.record_new(size_bytes);
            }
            stats.update_peak(live);
        }
        tracing::debug!(size_bytes, class, reused, "blob allocated");

        BlobGuard::new(blob, size_bytes, Arc::clone(&self.inner))
    }

    fn record_oom(&self) {
        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_oom();
        }
    }

    /// Capacity of all blobs currently handed out.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Bytes left before the budget is reached.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    pub fn context(&self) -> &ClContext {
        &self.inner.context
    }

    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Releases every cached blob back to the device.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_blobs.lock() {
            free.clear();
            self.inner.free_list_bytes.store(0, Ordering::Release);
        }
    }

    /// Bytes held by cached, unused blobs.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }
}

/// Smallest power of two that is at least `size` and [`MIN_SIZE_CLASS`].
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

impl std::fmt::Debug for BlobPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobPool")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("free_list_bytes", &self.free_list_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::{DeviceOptions, DeviceProperties};

    fn pool(budget: MemoryBudget) -> BlobPool {
        BlobPool::new(ClContext::new(DeviceOptions::default()), budget)
    }

    #[test]
    fn test_allocate_and_drop() {
        let pool = pool(MemoryBudget::from_mb(1));
        let blob = pool.allocate(1000).unwrap();
        assert_eq!(blob.size_bytes(), 1000);
        assert_eq!(blob.buffer().size(), 1000);
        assert_eq!(blob.capacity(), 1024);
        assert_eq!(pool.allocated_bytes(), 1024);

        drop(blob);
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.free_list_bytes(), 1024);
    }

    #[test]
    fn test_reuse_same_size_class() {
        let pool = pool(MemoryBudget::from_mb(1));
        let ctx = pool.context().clone();

        let blob = pool.allocate(3000).unwrap();
        let storage = blob.buffer().storage_id();
        blob.buffer().fill(0xAB);
        drop(blob);

        let again = pool.allocate(4000).unwrap();
        assert_eq!(again.buffer().storage_id(), storage);
        assert!(again.buffer().to_vec().iter().all(|&b| b == 0));
        assert_eq!(ctx.live_buffers(), 1);

        let stats = pool.stats();
        assert_eq!(stats.new_blobs, 1);
        assert_eq!(stats.reused_blobs, 1);
    }

    #[test]
    fn test_live_blobs_are_exclusive() {
        let pool = pool(MemoryBudget::from_mb(1));
        let a = pool.allocate(512).unwrap();
        let b = pool.allocate(512).unwrap();
        assert!(!a.buffer().overlaps(b.buffer()));
    }

    #[test]
    fn test_budget_exceeded() {
        let pool = pool(MemoryBudget::from_bytes(1024));
        let _a = pool.allocate(512).unwrap();
        let _b = pool.allocate(512).unwrap();
        let err = pool.allocate(1).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { .. }));
        assert_eq!(pool.stats().oom_count, 1);
    }

    #[test]
    fn test_device_capacity_exceeded() {
        let props = DeviceProperties {
            global_mem_size: 4096,
            ..DeviceProperties::default()
        };
        let ctx = ClContext::new(DeviceOptions::from_properties(&props));
        let pool = BlobPool::new(ctx, MemoryBudget::unlimited());
        let _a = pool.allocate(4096).unwrap();
        let err = pool.allocate(256).unwrap_err();
        assert!(matches!(err, MemoryError::Device(_)));
        assert_eq!(pool.allocated_bytes(), 4096);
    }

    #[test]
    fn test_zero_allocation() {
        let pool = pool(MemoryBudget::from_mb(1));
        assert_eq!(pool.allocate(0).unwrap_err(), MemoryError::ZeroSizedAllocation);
    }

    #[test]
    fn test_shrink_releases_device_memory() {
        let pool = pool(MemoryBudget::from_mb(1));
        let ctx = pool.context().clone();
        drop(pool.allocate(8192).unwrap());
        assert_eq!(ctx.allocated_bytes(), 8192);

        pool.shrink();
        assert_eq!(pool.free_list_bytes(), 0);
        assert_eq!(ctx.allocated_bytes(), 0);
    }

    #[test]
    fn test_size_class() {
        assert_eq!(size_class_for(1), MIN_SIZE_CLASS);
        assert_eq!(size_class_for(256), 256);
        assert_eq!(size_class_for(257), 512);
        assert_eq!(size_class_for(1 << 20), 1 << 20);
    }

    #[test]
    fn test_debug_format() {
        let pool = pool(MemoryBudget::from_mb(64));
        let debug = format!("{pool:?}");
        assert!(debug.contains("BlobPool"));
        assert!(debug.contains("budget"));
    }
}
