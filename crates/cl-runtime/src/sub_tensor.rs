// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sub-tensors: views onto a region of a parent tensor.

use device_context::{BufferBytes, CommandQueue, DeviceBuffer, Event, HostMapping};
use tensor_core::{Shape, TensorError, TensorInfo};

use crate::element::{read_dense, write_dense};
use crate::{ClTensor, DeviceTensor, RuntimeError};

/// A region of a parent [`ClTensor`].
///
/// Shares the parent's buffer; its info has the parent's strides and an
/// offset first element. It never allocates or frees, and dropping it
/// leaves the parent untouched. The borrow keeps the parent from being
/// reallocated while the view exists.
pub struct ClSubTensor<'a> {
    parent: &'a ClTensor,
    info: TensorInfo,
    mapping: Option<HostMapping>,
}

impl<'a> ClSubTensor<'a> {
    /// A view of `shape` elements starting at `coords` in `parent`.
    ///
    /// # Errors
    /// [`TensorError::SubTensorOutOfBounds`] if the region does not lie
    /// inside the parent.
    pub fn new(parent: &'a ClTensor, shape: Shape, coords: &[usize]) -> Result<Self, TensorError> {
        let info = parent.info().sub_info(shape, coords)?;
        Ok(Self {
            parent,
            info,
            mapping: None,
        })
    }

    pub fn parent(&self) -> &'a ClTensor {
        self.parent
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    /// Maps the parent's buffer. Offsets in [`ClSubTensor::info`] locate
    /// the view inside it.
    ///
    /// # Panics
    /// Panics if already mapped or the parent has no memory.
    pub fn map(&mut self, queue: &CommandQueue, blocking: bool) {
        assert!(self.mapping.is_none(), "sub-tensor is already mapped");
        let Some(buffer) = self.parent.cl_buffer() else {
            panic!("map() called on a sub-tensor whose parent has no backing memory");
        };
        self.mapping = Some(queue.enqueue_map(&buffer, blocking));
    }

    pub fn unmap(&mut self, queue: &CommandQueue) -> Event {
        let Some(mapping) = self.mapping.take() else {
            panic!("unmap() called on a sub-tensor that is not mapped");
        };
        queue.enqueue_unmap(mapping)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Host view of the parent's whole buffer while mapped.
    pub fn buffer(&self) -> Option<BufferBytes<'_>> {
        self.mapping.as_ref().map(HostMapping::bytes)
    }

    /// Writes `values` (x fastest) into the region.
    pub fn copy_from_f32(&mut self, queue: &CommandQueue, values: &[f32]) -> Result<(), RuntimeError> {
        let expected = self.info.shape().num_elements();
        if values.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: values.len(),
            }
            .into());
        }
        self.map(queue, true);
        if let Some(mapping) = &self.mapping {
            write_dense(&self.info, &mut mapping.bytes(), values);
        }
        self.unmap(queue);
        Ok(())
    }

    /// Reads the region (x fastest) as `f32`.
    pub fn to_f32_vec(&mut self, queue: &CommandQueue) -> Vec<f32> {
        self.map(queue, true);
        let values = self
            .buffer()
            .map(|bytes| read_dense(&self.info, &bytes))
            .unwrap_or_default();
        self.unmap(queue);
        values
    }
}

impl DeviceTensor for ClSubTensor<'_> {
    fn info(&self) -> &TensorInfo {
        &self.info
    }

    fn cl_buffer(&self) -> Option<DeviceBuffer> {
        self.parent.cl_buffer()
    }
}

impl std::fmt::Debug for ClSubTensor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClSubTensor")
            .field("shape", self.info.shape())
            .field("offset", &self.info.offset_first_element_in_bytes())
            .field("mapped", &self.mapping.is_some())
            .finish()
    }
}
