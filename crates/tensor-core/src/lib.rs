// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor metadata shared by every layer of the compute runtime.
//!
//! This crate provides:
//! - [`Shape`]: dimension sizes, x (innermost) first, up to [`MAX_DIMS`].
//! - [`DType`]: element data types, including the quantized formats.
//! - [`QuantizationInfo`]: uniform or per-channel scale/offset parameters.
//! - [`TensorInfo`]: shape + type + padding + byte strides + total size,
//!   mutable only while the tensor is still *resizable*.
//! - [`Window`]: the per-dimension `(start, end, step)` iteration domain a
//!   kernel is dispatched over.
//! - [`TensorError`] / [`Status`]: structured validation results returned by
//!   every `validate()` entry point.
//!
//! Nothing here touches device memory; it is pure, copy-cheap metadata.

mod dtype;
mod error;
mod quantization;
mod shape;
mod tensor_info;
mod types;
mod window;

pub use dtype::DType;
pub use error::{Status, TensorError};
pub use quantization::{QuantizationInfo, UniformQuantizationInfo};
pub use shape::{Shape, MAX_DIMS};
pub use tensor_info::TensorInfo;
pub use types::{BorderSize, DataLayout, PaddingSize, Strides};
pub use window::{Dimension, Window};
