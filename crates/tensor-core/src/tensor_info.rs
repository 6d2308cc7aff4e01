// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor metadata: shape, data type, padding, byte strides and
//! quantization.
//!
//! Strides are derived from the *padded* extents. With element size `es`:
//!
//! ```text
//! stride[0] = es
//! stride[1] = (left + width + right) * es
//! stride[2] = (top + height + bottom) * stride[1]
//! stride[i] = dim[i - 1] * stride[i - 1]      (i >= 3)
//! ```
//!
//! The first valid element sits `top * stride[1] + left * es` bytes into
//! the buffer. The total size covers every padded row of every plane.

use crate::{
    BorderSize, DType, DataLayout, PaddingSize, QuantizationInfo, Shape, Strides, TensorError,
    MAX_DIMS,
};

/// Metadata describing the memory layout of a tensor.
///
/// An info is *resizable* until the tensor that owns it is allocated.
/// Changing the shape or padding of a fixed info is a contract violation
/// and panics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TensorInfo {
    shape: Shape,
    dtype: DType,
    padding: PaddingSize,
    strides: Strides,
    offset_first_element: usize,
    total_size: usize,
    quantization: QuantizationInfo,
    layout: DataLayout,
    is_resizable: bool,
}

impl Default for TensorInfo {
    /// An uninitialised info: no shape and a total size of zero.
    fn default() -> Self {
        Self {
            shape: Shape::scalar(),
            dtype: DType::U8,
            padding: PaddingSize::empty(),
            strides: [0; MAX_DIMS],
            offset_first_element: 0,
            total_size: 0,
            quantization: QuantizationInfo::default(),
            layout: DataLayout::Nchw,
            is_resizable: true,
        }
    }
}

impl TensorInfo {
    /// Creates a dense, unpadded, resizable info.
    pub fn new(shape: Shape, dtype: DType) -> Self {
        let mut info = Self {
            shape,
            dtype,
            ..Self::default()
        };
        info.update_layout();
        info
    }

    /// Builder: attach quantization parameters.
    pub fn with_quantization(mut self, quantization: QuantizationInfo) -> Self {
        self.quantization = quantization;
        self
    }

    /// Builder: set the data layout.
    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Builder: start with the given padding.
    pub fn with_padding(mut self, padding: PaddingSize) -> Self {
        self.padding = padding;
        self.update_layout();
        self
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn element_size(&self) -> usize {
        self.dtype.size_bytes()
    }

    pub fn num_dimensions(&self) -> usize {
        self.shape.rank()
    }

    pub fn padding(&self) -> PaddingSize {
        self.padding
    }

    pub fn has_padding(&self) -> bool {
        !self.padding.is_empty()
    }

    /// Byte strides for all [`MAX_DIMS`] dimensions.
    pub fn strides_in_bytes(&self) -> &Strides {
        &self.strides
    }

    pub fn offset_first_element_in_bytes(&self) -> usize {
        self.offset_first_element
    }

    /// Size in bytes of the buffer backing this tensor, padding included.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn quantization_info(&self) -> &QuantizationInfo {
        &self.quantization
    }

    pub fn data_layout(&self) -> DataLayout {
        self.layout
    }

    pub fn is_resizable(&self) -> bool {
        self.is_resizable
    }

    /// Returns `false` for a default-constructed info that has no storage
    /// requirement yet.
    pub fn is_initialised(&self) -> bool {
        self.total_size > 0
    }

    /// Number of channels, which sits on `z` for NCHW and on `x` for NHWC.
    pub fn num_channels(&self) -> usize {
        match self.layout {
            DataLayout::Nchw => self.shape.dim(2),
            DataLayout::Nhwc => self.shape.dim(0),
        }
    }

    /// Byte offset of the element at `coords` (x first). Negative
    /// coordinates address the padding before the first element.
    ///
    /// # Panics
    /// Panics if the resulting offset falls before the start of the buffer.
    pub fn offset_element_in_bytes(&self, coords: &[isize]) -> usize {
        let mut offset = self.offset_first_element as isize;
        for (c, s) in coords.iter().zip(self.strides.iter()) {
            offset += c * *s as isize;
        }
        assert!(offset >= 0, "coordinates {coords:?} fall outside the buffer");
        offset as usize
    }

    // ── Mutation (resizable only) ───────────────────────────────

    /// Fixes or unfixes the layout. The allocator clears this flag on
    /// `allocate()` and sets it again on `free()`.
    pub fn set_is_resizable(&mut self, resizable: bool) {
        self.is_resizable = resizable;
    }

    /// Replaces the shape and recomputes strides.
    ///
    /// # Panics
    /// Panics if the info is not resizable.
    pub fn set_shape(&mut self, shape: Shape) {
        assert!(self.is_resizable, "cannot change the shape of a fixed tensor info");
        self.shape = shape;
        self.update_layout();
    }

    /// Replaces the quantization parameters.
    pub fn set_quantization_info(&mut self, quantization: QuantizationInfo) {
        self.quantization = quantization;
    }

    pub fn set_data_layout(&mut self, layout: DataLayout) {
        self.layout = layout;
    }

    /// Grows the padding so every side is at least `padding`.
    ///
    /// Returns `true` if the layout changed.
    ///
    /// # Panics
    /// Panics if the info is not resizable.
    pub fn extend_padding(&mut self, padding: PaddingSize) -> bool {
        assert!(self.is_resizable, "cannot extend the padding of a fixed tensor info");
        let merged = self.padding.max(&padding);
        if merged == self.padding {
            return false;
        }
        self.padding = merged;
        self.update_layout();
        true
    }

    /// Builds the info of a sub-tensor of `shape` starting at `coords`.
    ///
    /// The sub-tensor shares the parent's strides and total size; its first
    /// element is offset into the parent buffer and its padding counts the
    /// parent elements surrounding it, so border-reading kernels can use
    /// the neighbouring data.
    pub fn sub_info(&self, shape: Shape, coords: &[usize]) -> Result<TensorInfo, TensorError> {
        let rank = self.shape.rank().max(shape.rank()).max(coords.len());
        let fits = (0..rank).all(|i| {
            let start = coords.get(i).copied().unwrap_or(0);
            start + shape.dim(i) <= self.shape.dim(i)
        });
        if !fits || shape.num_elements() == 0 {
            return Err(TensorError::SubTensorOutOfBounds {
                shape,
                coords: coords.to_vec(),
                parent: self.shape.clone(),
            });
        }

        let signed: Vec<isize> = coords.iter().map(|&c| c as isize).collect();
        let x0 = coords.first().copied().unwrap_or(0);
        let y0 = coords.get(1).copied().unwrap_or(0);
        let padding = BorderSize {
            top: self.padding.top + y0,
            right: self.padding.right + self.shape.dim(0) - x0 - shape.dim(0),
            bottom: self.padding.bottom + self.shape.dim(1) - y0 - shape.dim(1),
            left: self.padding.left + x0,
        };

        Ok(TensorInfo {
            offset_first_element: self.offset_element_in_bytes(&signed),
            shape,
            dtype: self.dtype,
            padding,
            strides: self.strides,
            total_size: self.total_size,
            quantization: self.quantization.clone(),
            layout: self.layout,
            is_resizable: false,
        })
    }

    fn update_layout(&mut self) {
        let es = self.dtype.size_bytes();
        let p = self.padding;
        let mut strides = [0usize; MAX_DIMS];
        strides[0] = es;
        strides[1] = (p.left + self.shape.dim(0) + p.right) * es;
        strides[2] = (p.top + self.shape.dim(1) + p.bottom) * strides[1];
        for i in 3..MAX_DIMS {
            strides[i] = self.shape.dim(i - 1) * strides[i - 1];
        }

        self.strides = strides;
        self.offset_first_element = p.top * strides[1] + p.left * es;
        self.total_size = if self.shape.num_elements() == 0 {
            0
        } else {
            self.shape.collapsed_from(2) * strides[2]
        };
    }
}
