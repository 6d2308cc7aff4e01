// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Depthwise 3×3 convolution with its border fill.

use tensor_core::{Status, TensorInfo};

use super::ClFunction;
use crate::kernels::{BorderMode, DepthwiseConv3x3Kernel, FillBorderKernel, PadStrideInfo};
use crate::{ClKernel, RuntimeError, Scheduler, TensorPack, TensorSlot};

/// Fills the input halo with zero (the zero point for quantized inputs),
/// then runs the depthwise kernel.
///
/// Slots: `Src0` input, `Src1` weights, optional `Src2` biases, `Dst`.
#[derive(Debug)]
pub struct DepthwiseConvolution3x3 {
    fill_border: FillBorderKernel,
    kernel: DepthwiseConv3x3Kernel,
}

impl DepthwiseConvolution3x3 {
    pub fn validate(
        src: &TensorInfo,
        weights: &TensorInfo,
        biases: Option<&TensorInfo>,
        dst: &TensorInfo,
        conv: &PadStrideInfo,
        depth_multiplier: usize,
    ) -> Status {
        DepthwiseConv3x3Kernel::validate(src, weights, biases, dst, conv, depth_multiplier)
    }

    /// Configures both kernels. `src` gains the padding the convolution
    /// reads when it is still resizable.
    pub fn configure(
        scheduler: &Scheduler,
        src: &mut TensorInfo,
        weights: &TensorInfo,
        biases: Option<&TensorInfo>,
        dst: &mut TensorInfo,
        conv: PadStrideInfo,
        depth_multiplier: usize,
    ) -> Result<Self, RuntimeError> {
        let library = scheduler.library();
        let kernel = DepthwiseConv3x3Kernel::configure(library, src, weights, biases, dst, conv, depth_multiplier)?;
        let fill_border = FillBorderKernel::configure(library, src, kernel.border_size(), BorderMode::Constant, 0.0)?;
        Ok(Self { fill_border, kernel })
    }

    pub fn kernel(&self) -> &DepthwiseConv3x3Kernel {
        &self.kernel
    }
}

impl ClFunction for DepthwiseConvolution3x3 {
    fn run(&mut self, pack: &TensorPack<'_>, scheduler: &Scheduler) -> Result<(), RuntimeError> {
        let Some(src) = pack.get(TensorSlot::Src0) else {
            return Err(RuntimeError::MissingTensor {
                kernel: self.kernel.name().to_string(),
                slot: TensorSlot::Src0,
            });
        };
        scheduler.enqueue(&self.fill_border, &TensorPack::new().with(TensorSlot::Dst, src), false)?;
        scheduler.enqueue(&self.kernel, pack, true)
    }
}
