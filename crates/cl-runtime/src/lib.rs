// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # cl-runtime
//!
//! Tensor memory layer and kernel dispatch for an OpenCL-style device.
//!
//! The runtime builds on:
//! - `tensor-core` for tensor metadata, windows and validation errors.
//! - `device-context` for the context, device buffers and command queue.
//! - `memory-manager` for pooled memory shared by intermediate tensors.
//!
//! # Tensor Lifecycle
//! ```text
//! ClTensor::new / init ──► kernels configure() against the info
//!        │                 (outputs auto-initialised, padding grown)
//!        ▼
//!   allocate()  ──► Owned buffer, or finalised into a MemoryGroup
//!        │
//!   map() / unmap()  ──► host access, balanced, unmap returns an Event
//!        │
//!   run() any number of times ──► free()
//! ```
//!
//! # Dispatch
//! Every kernel implements [`ClKernel`]. `configure()` validates once,
//! builds (or reuses) its program through the [`KernelLibrary`] and picks
//! a local work size hint with [`select_local_work_size`] for its
//! [`KernelType`]. `run()` splits the window into 3-D slices and enqueues
//! one dispatch per slice; [`Scheduler`] drives kernels and composite
//! [`functions`] over their maximum window.
//!
//! # Example
//! ```
//! use cl_runtime::kernels::{ArithmeticOp, ConvertPolicy, ElementwiseKernel};
//! use cl_runtime::{RuntimeConfig, Scheduler, TensorPack, TensorSlot};
//! use tensor_core::{DType, Shape, TensorInfo};
//!
//! let scheduler = Scheduler::from_config(&RuntimeConfig::default()).unwrap();
//! let info = TensorInfo::new(Shape::d2(4, 4), DType::F32);
//! let mut a = scheduler.new_tensor(info.clone());
//! let mut b = scheduler.new_tensor(info);
//! let mut out = scheduler.new_tensor(TensorInfo::default());
//!
//! let add = ElementwiseKernel::configure(
//!     scheduler.library(),
//!     ArithmeticOp::Add,
//!     a.info(),
//!     b.info(),
//!     out.info_mut(),
//!     ConvertPolicy::Saturate,
//! )
//! .unwrap();
//! for t in [&mut a, &mut b, &mut out] {
//!     t.allocate().unwrap();
//! }
//!
//! let queue = scheduler.queue();
//! a.fill_f32(queue, 1.0).unwrap();
//! b.fill_f32(queue, 2.0).unwrap();
//! let pack = TensorPack::new()
//!     .with(TensorSlot::Src0, &a)
//!     .with(TensorSlot::Src1, &b)
//!     .with(TensorSlot::Dst, &out);
//! scheduler.enqueue(&add, &pack, true).unwrap();
//! assert_eq!(out.to_f32_vec(queue).unwrap(), vec![3.0; 16]);
//! ```

mod allocator;
mod array;
mod config;
mod element;
mod error;
pub mod functions;
mod kernel;
mod kernel_library;
pub mod kernels;
mod lws;
mod metrics;
mod quantization;
mod scheduler;
mod sub_tensor;
mod tensor;

pub use allocator::{set_global_allocator, Allocator, DeviceAllocator, TensorAllocator};
pub use array::{
    ClArray, ClCoordinates2DArray, ClFloatArray, ClInt32Array, ClUInt32Array, Coordinates2D,
};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use kernel::{
    enqueue, gws_from_window, ClKernel, KernelCore, KernelType, TensorPack, TensorSlot, DEFAULT_CONFIG_ID,
};
pub use kernel_library::{BuildOptions, CompiledKernel, KernelLibrary, ProgramCacheStats};
pub use lws::{select_local_work_size, select_local_work_size_with_default, DEFAULT_LWS};
pub use metrics::{DispatchMetrics, KernelMetrics};
pub use quantization::ClQuantization;
pub use scheduler::Scheduler;
pub use sub_tensor::ClSubTensor;
pub use tensor::{ClTensor, DeviceTensor};
