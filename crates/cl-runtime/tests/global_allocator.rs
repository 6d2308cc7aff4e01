// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The global allocator is process-wide, so it gets its own test binary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cl_runtime::{set_global_allocator, Allocator, DeviceAllocator, RuntimeError};
use device_context::{ClContext, ClError, DeviceBuffer, DeviceOptions};
use memory_manager::{BlobPool, MemoryBudget, MemoryGroup};
use tensor_core::{DType, Shape, TensorInfo};

#[derive(Default)]
struct CountingAllocator {
    calls: AtomicUsize,
    bytes: AtomicUsize,
}

impl Allocator for CountingAllocator {
    fn allocate(&self, context: &ClContext, size: usize, alignment: usize) -> Result<DeviceBuffer, ClError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(size, Ordering::SeqCst);
        DeviceAllocator.allocate(context, size, alignment)
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[test]
fn test_custom_allocator_serves_unmanaged_tensors() {
    let counter = Arc::new(CountingAllocator::default());
    set_global_allocator(counter.clone()).unwrap();
    assert!(matches!(
        set_global_allocator(Arc::new(DeviceAllocator)),
        Err(RuntimeError::GlobalAllocatorAlreadySet)
    ));

    let ctx = ClContext::new(DeviceOptions::default());
    let mut owned = cl_runtime::ClTensor::new(&ctx, TensorInfo::new(Shape::d2(8, 8), DType::F32));
    owned.allocate().unwrap();
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(counter.bytes.load(Ordering::SeqCst), 256);

    // managed tensors take their memory from the group's pool instead
    let group = MemoryGroup::new(BlobPool::new(ctx.clone(), MemoryBudget::from_mb(1)));
    let mut managed = cl_runtime::ClTensor::new(&ctx, TensorInfo::new(Shape::d2(8, 8), DType::F32));
    managed.associate_memory_group(&group);
    managed.allocate().unwrap();
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
}
