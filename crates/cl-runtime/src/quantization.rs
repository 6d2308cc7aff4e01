// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Read-only view of a tensor's quantization parameters.

use tensor_core::UniformQuantizationInfo;

use crate::{ClFloatArray, ClInt32Array};

/// Quantization parameters as kernels consume them.
///
/// Uniform tensors expose a scalar `(scale, offset)` pair. Per-channel
/// tensors additionally expose the device arrays their allocator
/// populated; the view borrows them and owns nothing.
#[derive(Clone, Copy)]
pub struct ClQuantization<'a> {
    uniform: UniformQuantizationInfo,
    scale: Option<&'a ClFloatArray>,
    offset: Option<&'a ClInt32Array>,
}

impl<'a> ClQuantization<'a> {
    pub(crate) fn new(
        uniform: UniformQuantizationInfo,
        scale: Option<&'a ClFloatArray>,
        offset: Option<&'a ClInt32Array>,
    ) -> Self {
        Self {
            uniform,
            scale,
            offset,
        }
    }

    /// First scale and offset of the tensor.
    pub fn uniform(&self) -> UniformQuantizationInfo {
        self.uniform
    }

    /// Per-channel scales, if the tensor is quantized per channel and
    /// allocated.
    pub fn scale(&self) -> Option<&'a ClFloatArray> {
        self.scale
    }

    /// Per-channel offsets, if any were given.
    pub fn offset(&self) -> Option<&'a ClInt32Array> {
        self.offset
    }

    pub fn is_per_channel(&self) -> bool {
        self.scale.is_some()
    }
}

impl std::fmt::Debug for ClQuantization<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClQuantization")
            .field("uniform", &self.uniform)
            .field("scale", &self.scale.map(|a| a.num_values()))
            .field("offset", &self.offset.map(|a| a.num_values()))
            .finish()
    }
}
