// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensors in device memory.
//!
//! [`ClTensor`] is the owning tensor: metadata plus a [`TensorAllocator`].
//! Kernels do not care who owns the memory; they bind anything that
//! implements [`DeviceTensor`], which [`crate::ClSubTensor`] does too.
//!
//! # Example
//! ```
//! use cl_runtime::ClTensor;
//! use device_context::{ClContext, DeviceOptions};
//! use tensor_core::{DType, Shape, TensorInfo};
//!
//! let ctx = ClContext::new(DeviceOptions::default());
//! let queue = ctx.create_queue();
//!
//! let mut t = ClTensor::new(&ctx, TensorInfo::new(Shape::d2(2, 2), DType::F32));
//! t.allocate().unwrap();
//! t.copy_from_f32(&queue, &[1.0, 2.0, 3.0, 4.0]).unwrap();
//! assert_eq!(t.to_f32_vec(&queue).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
//! ```

use device_context::{BufferBytes, ClContext, CommandQueue, DeviceBuffer, Event};
use memory_manager::MemoryGroup;
use tensor_core::{Status, TensorError, TensorInfo};

use crate::element::{read_dense, write_dense};
use crate::{ClQuantization, RuntimeError, TensorAllocator};

/// What a kernel needs from a tensor bound to one of its slots.
pub trait DeviceTensor {
    fn info(&self) -> &TensorInfo;

    /// The buffer holding the tensor, or `None` while no memory is
    /// attached. Offsets in [`DeviceTensor::info`] are relative to its
    /// start.
    fn cl_buffer(&self) -> Option<DeviceBuffer>;
}

/// A tensor that owns (or borrows from a memory group) its device memory.
///
/// Not `Clone`: a tensor has exactly one allocator.
#[derive(Debug)]
pub struct ClTensor {
    allocator: TensorAllocator,
}

impl ClTensor {
    /// A tensor described by `info`, not yet allocated.
    pub fn new(context: &ClContext, info: TensorInfo) -> Self {
        let mut allocator = TensorAllocator::new(context);
        allocator.init(info);
        Self { allocator }
    }

    /// A tensor without metadata, to be set with [`ClTensor::init`].
    pub fn empty(context: &ClContext) -> Self {
        Self {
            allocator: TensorAllocator::new(context),
        }
    }

    /// Sets the metadata.
    ///
    /// # Panics
    /// Panics if the current info is fixed.
    pub fn init(&mut self, info: TensorInfo) {
        assert!(self.info().is_resizable(), "init() on a tensor with a fixed info");
        self.allocator.init(info);
    }

    pub fn info(&self) -> &TensorInfo {
        self.allocator.info()
    }

    /// Mutable metadata, e.g. to extend the padding a kernel needs.
    ///
    /// # Panics
    /// Panics once the tensor is allocated.
    pub fn info_mut(&mut self) -> &mut TensorInfo {
        self.allocator.info_mut()
    }

    pub fn allocator(&self) -> &TensorAllocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut TensorAllocator {
        &mut self.allocator
    }

    pub fn allocate(&mut self) -> Result<(), RuntimeError> {
        self.allocator.allocate()
    }

    pub fn free(&mut self) {
        self.allocator.free();
    }

    /// See [`TensorAllocator::import_memory`].
    pub fn import_memory(&mut self, buffer: DeviceBuffer) -> Status {
        self.allocator.import_memory(buffer)
    }

    /// Puts the tensor's memory under `group`. Call before `allocate()`.
    pub fn associate_memory_group(&mut self, group: &MemoryGroup) {
        self.allocator.set_associated_memory_group(group);
    }

    pub fn quantization(&self) -> ClQuantization<'_> {
        self.allocator.quantization()
    }

    // ── Mapping ─────────────────────────────────────────────────

    pub fn map(&mut self, queue: &CommandQueue, blocking: bool) {
        self.allocator.map(queue, blocking);
    }

    pub fn unmap(&mut self, queue: &CommandQueue) -> Event {
        self.allocator.unmap(queue)
    }

    pub fn is_mapped(&self) -> bool {
        self.allocator.mapping().is_some()
    }

    /// Host view of the whole buffer, padding included, while mapped.
    ///
    /// The view is writable and writes through to the mapping.
    ///
    /// # Panics
    /// Panics if the tensor was mapped without blocking and the queue has
    /// not been finished since.
    pub fn buffer(&self) -> Option<BufferBytes<'_>> {
        self.allocator.mapping().map(|m| m.bytes())
    }

    // ── Typed transfers ─────────────────────────────────────────

    /// Writes `values` (x fastest) into the tensor, quantizing if needed.
    /// Maps, writes and unmaps; padding is left untouched.
    pub fn copy_from_f32(&mut self, queue: &CommandQueue, values: &[f32]) -> Result<(), RuntimeError> {
        let expected = self.info().shape().num_elements();
        if values.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: values.len(),
            }
            .into());
        }
        self.map(queue, true);
        if let Some(mapping) = self.allocator.mapping() {
            write_dense(self.allocator.info(), &mut mapping.bytes(), values);
        }
        self.unmap(queue);
        Ok(())
    }

    /// Reads every element (x fastest) as `f32`, dequantizing if needed.
    pub fn to_f32_vec(&mut self, queue: &CommandQueue) -> Result<Vec<f32>, RuntimeError> {
        self.map(queue, true);
        let values = self
            .buffer()
            .map(|bytes| read_dense(self.info(), &bytes))
            .unwrap_or_default();
        self.unmap(queue);
        Ok(values)
    }

    /// Sets every element to `value`.
    pub fn fill_f32(&mut self, queue: &CommandQueue, value: f32) -> Result<(), RuntimeError> {
        let values = vec![value; self.info().shape().num_elements()];
        self.copy_from_f32(queue, &values)
    }
}

impl DeviceTensor for ClTensor {
    fn info(&self) -> &TensorInfo {
        self.allocator.info()
    }

    fn cl_buffer(&self) -> Option<DeviceBuffer> {
        self.allocator.cl_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::DeviceOptions;
    use memory_manager::{BlobPool, MemoryBudget};
    use tensor_core::{BorderSize, DType, QuantizationInfo, Shape};

    fn setup() -> (ClContext, CommandQueue) {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        (ctx, queue)
    }

    #[test]
    fn test_buffer_only_while_mapped() {
        let (ctx, queue) = setup();
        let mut t = ClTensor::new(&ctx, TensorInfo::new(Shape::vector(16), DType::U8));
        t.allocate().unwrap();
        assert!(t.buffer().is_none());

        t.map(&queue, true);
        let storage = t.buffer().map(|b| b.len());
        assert_eq!(storage, Some(16));
        assert_eq!(t.buffer().map(|b| b.len()), storage);
        t.unmap(&queue);

        assert!(t.buffer().is_none());
        assert!(!t.is_mapped());
    }

    #[test]
    fn test_write_through_mapping_visible_to_device() {
        let (ctx, queue) = setup();
        let mut t = ClTensor::new(&ctx, TensorInfo::new(Shape::vector(4), DType::U8));
        t.allocate().unwrap();
        t.map(&queue, true);
        if let Some(mut bytes) = t.buffer() {
            bytes.copy_from_slice(&[1, 2, 3, 4]);
        }
        let fence = t.unmap(&queue);
        assert!(!fence.is_complete());
        queue.finish();
        assert!(fence.is_complete());
        assert_eq!(t.cl_buffer().unwrap().to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_init_empty_tensor() {
        let (ctx, _queue) = setup();
        let mut t = ClTensor::empty(&ctx);
        assert!(!t.info().is_initialised());
        t.init(TensorInfo::new(Shape::d2(3, 3), DType::F32));
        t.info_mut().extend_padding(BorderSize::uniform(1));
        assert_eq!(t.info().total_size(), 5 * 5 * 4);
        t.allocate().unwrap();
        assert_eq!(t.cl_buffer().unwrap().size(), 100);
    }

    #[test]
    fn test_padded_roundtrip() {
        let (ctx, queue) = setup();
        let info = TensorInfo::new(Shape::d2(2, 2), DType::F32).with_padding(BorderSize::uniform(2));
        let mut t = ClTensor::new(&ctx, info);
        t.allocate().unwrap();
        t.copy_from_f32(&queue, &[1.0, -2.0, 3.5, 4.0]).unwrap();
        assert_eq!(t.to_f32_vec(&queue).unwrap(), vec![1.0, -2.0, 3.5, 4.0]);
    }

    #[test]
    fn test_quantized_roundtrip() {
        let (ctx, queue) = setup();
        let info = TensorInfo::new(Shape::vector(3), DType::QAsymm8)
            .with_quantization(QuantizationInfo::new(0.5, 10));
        let mut t = ClTensor::new(&ctx, info);
        t.allocate().unwrap();
        t.copy_from_f32(&queue, &[0.0, 1.5, -5.0]).unwrap();
        assert_eq!(t.cl_buffer().unwrap().to_vec(), vec![10, 13, 0]);
        assert_eq!(t.to_f32_vec(&queue).unwrap(), vec![0.0, 1.5, -5.0]);
    }

    #[test]
    fn test_copy_size_mismatch() {
        let (ctx, queue) = setup();
        let mut t = ClTensor::new(&ctx, TensorInfo::new(Shape::vector(3), DType::F32));
        t.allocate().unwrap();
        let err = t.copy_from_f32(&queue, &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Validation(TensorError::BufferSizeMismatch { expected: 3, actual: 1 })
        ));
        assert!(!t.is_mapped());
    }

    #[test]
    fn test_fill() {
        let (ctx, queue) = setup();
        let mut t = ClTensor::new(&ctx, TensorInfo::new(Shape::d2(2, 3), DType::S32));
        t.allocate().unwrap();
        t.fill_f32(&queue, 7.0).unwrap();
        assert_eq!(t.to_f32_vec(&queue).unwrap(), vec![7.0; 6]);
    }

    #[test]
    fn test_pooled_exclusivity() {
        let (ctx, queue) = setup();
        let group = MemoryGroup::new(BlobPool::new(ctx.clone(), MemoryBudget::from_mb(1)));
        let mut a = ClTensor::new(&ctx, TensorInfo::new(Shape::vector(64), DType::F32));
        let mut b = ClTensor::new(&ctx, TensorInfo::new(Shape::vector(64), DType::F32));
        a.associate_memory_group(&group);
        b.associate_memory_group(&group);
        a.allocate().unwrap();
        b.allocate().unwrap();

        let _scope = group.scope().unwrap();
        a.map(&queue, true);
        b.map(&queue, true);
        let (ba, bb) = (a.cl_buffer().unwrap(), b.cl_buffer().unwrap());
        assert!(!ba.overlaps(&bb));
        a.unmap(&queue);
        b.unmap(&queue);
    }

    #[test]
    fn test_managed_tensor_needs_acquired_group() {
        let (ctx, queue) = setup();
        let group = MemoryGroup::new(BlobPool::new(ctx.clone(), MemoryBudget::from_mb(1)));
        let mut t = ClTensor::new(&ctx, TensorInfo::new(Shape::vector(4), DType::F32));
        t.associate_memory_group(&group);
        t.allocate().unwrap();
        assert!(t.cl_buffer().is_none());

        let _scope = group.scope().unwrap();
        t.copy_from_f32(&queue, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.to_f32_vec(&queue).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
