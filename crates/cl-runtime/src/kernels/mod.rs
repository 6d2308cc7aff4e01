// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Concrete kernels.
//!
//! Each kernel follows the same contract: a side-effect-free `validate()`
//! returning a [`tensor_core::Status`], a `configure()` constructor that
//! validates once, picks the program and build options, auto-initialises
//! an empty output and sets the maximum window, and a [`crate::ClKernel::run`]
//! that only binds tensors and enqueues work.

mod depthwise;
mod elementwise;
mod fill_border;
mod gemm;
mod min_max_location;
mod pooling;

pub use depthwise::{depthwise_output_shape, DepthwiseConv3x3Kernel, PadStrideInfo};
pub use elementwise::{ArithmeticOp, ConvertPolicy, ElementwiseKernel};
pub use fill_border::{BorderMode, FillBorderKernel};
pub use gemm::{gemm_output_shape, GemmKernel};
pub use min_max_location::{MinMaxLocationKernel, MinMaxResult};
pub use pooling::{PoolType, PoolingInfo, PoolingKernel};
