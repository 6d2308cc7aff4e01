// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise binary arithmetic with broadcasting.
//!
//! Both inputs are broadcast to the output shape: a dimension of size 1
//! in an input is repeated along the output. Integer outputs either wrap
//! or saturate according to the [`ConvertPolicy`]; quantized inputs are
//! dequantized, combined in `f32` and requantized with the output's
//! parameters.

use std::fmt;

use device_context::CommandQueue;
use tensor_core::{DType, Shape, Status, TensorError, TensorInfo, Window, MAX_DIMS};

use crate::element::{offset_of, Coords, CoordIter, ElementCodec};
use crate::kernel::{enqueue, for_each_slice, BoundTensor};
use crate::{BuildOptions, ClKernel, KernelCore, KernelLibrary, KernelType, RuntimeError, TensorPack, TensorSlot};

/// Bytes processed by one work item along x.
const BYTES_PER_ITERATION: usize = 16;

/// Supported binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Min,
    Max,
}

impl ArithmeticOp {
    /// Name used in kernel names and the `-DOP=` build option.
    pub fn as_str(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "ADD",
            ArithmeticOp::Sub => "SUB",
            ArithmeticOp::Mul => "MUL",
            ArithmeticOp::Min => "MIN",
            ArithmeticOp::Max => "MAX",
        }
    }

    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Min => a.min(b),
            ArithmeticOp::Max => a.max(b),
        }
    }

    /// Whether the result of integer inputs can leave the input range.
    fn can_overflow(self) -> bool {
        matches!(self, ArithmeticOp::Add | ArithmeticOp::Sub | ArithmeticOp::Mul)
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overflow behaviour of integer outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum ConvertPolicy {
    Wrap,
    #[default]
    Saturate,
}

const OP: &str = "elementwise";

const SUPPORTED: [DType; 6] = [
    DType::U8,
    DType::QAsymm8,
    DType::S16,
    DType::QSymm16,
    DType::F16,
    DType::F32,
];

fn check_supported(dtype: DType) -> Status {
    if SUPPORTED.contains(&dtype) {
        Ok(())
    } else {
        Err(TensorError::UnsupportedDType { op: OP, dtype })
    }
}

fn check_symmetric_offset(info: &TensorInfo) -> Status {
    let dtype = info.dtype();
    if dtype.is_quantized() && !dtype.is_quantized_asymmetric() && info.quantization_info().uniform().offset != 0 {
        return Err(TensorError::Quantization {
            op: OP,
            detail: "for quantized symmetric, offset must be zero".to_string(),
        });
    }
    Ok(())
}

/// Data type of an auto-initialised output.
fn output_dtype(a: DType, b: DType) -> DType {
    if a == DType::S16 || b == DType::S16 {
        DType::S16
    } else if a == DType::F16 && b == DType::F16 {
        DType::F16
    } else if a == DType::F32 || b == DType::F32 {
        DType::F32
    } else if a == DType::QAsymm8 || b == DType::QAsymm8 {
        DType::QAsymm8
    } else if a == DType::QSymm16 || b == DType::QSymm16 {
        DType::QSymm16
    } else {
        a
    }
}

/// Elementwise `dst = src0 <op> src1`.
///
/// Slots: `Src0`, `Src1`, `Dst`.
#[derive(Debug)]
pub struct ElementwiseKernel {
    core: KernelCore,
    op: ArithmeticOp,
    policy: ConvertPolicy,
}

impl ElementwiseKernel {
    /// Checks whether the kernel supports the given tensors.
    ///
    /// `dst` is only checked when initialised.
    /// The rules are the same for every operation and policy.
    pub fn validate(src0: &TensorInfo, src1: &TensorInfo, dst: &TensorInfo) -> Status {
        check_supported(src0.dtype())?;
        check_supported(src1.dtype())?;

        let quantized = src0.dtype().is_quantized() || src1.dtype().is_quantized();
        let floating = src0.dtype().is_float() || src1.dtype().is_float();
        if (quantized || floating) && src0.dtype() != src1.dtype() {
            return Err(TensorError::MismatchingDTypes {
                op: OP,
                lhs: src0.dtype(),
                rhs: src1.dtype(),
            });
        }
        if quantized {
            check_symmetric_offset(src0)?;
            check_symmetric_offset(src1)?;
        }

        let Some(out_shape) = Shape::broadcast(&[src0.shape(), src1.shape()]) else {
            return Err(TensorError::ShapeMismatch {
                op: OP,
                lhs: src0.shape().clone(),
                rhs: src1.shape().clone(),
            });
        };
        if out_shape.num_elements() == 0 {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: "inputs are not broadcast compatible".to_string(),
            });
        }

        if dst.is_initialised() {
            check_supported(dst.dtype())?;
            if dst.dtype() == DType::U8 && (src0.dtype() != DType::U8 || src1.dtype() != DType::U8) {
                return Err(TensorError::Unsupported {
                    op: OP,
                    detail: "output can only be U8 if both inputs are U8".to_string(),
                });
            }
            if !same_dims(&out_shape, dst.shape()) {
                return Err(TensorError::ShapeMismatch {
                    op: OP,
                    lhs: out_shape,
                    rhs: dst.shape().clone(),
                });
            }
            if quantized || floating {
                if dst.dtype() != src0.dtype() {
                    return Err(TensorError::MismatchingDTypes {
                        op: OP,
                        lhs: src0.dtype(),
                        rhs: dst.dtype(),
                    });
                }
                check_symmetric_offset(dst)?;
            }
        }
        Ok(())
    }

    /// Validates, initialises `dst` if it is empty, and builds the kernel.
    pub fn configure(
        library: &KernelLibrary,
        op: ArithmeticOp,
        src0: &TensorInfo,
        src1: &TensorInfo,
        dst: &mut TensorInfo,
        policy: ConvertPolicy,
    ) -> Result<Self, RuntimeError> {
        Self::validate(src0, src1, dst)?;

        if !dst.is_initialised() {
            let shape = Shape::broadcast(&[src0.shape(), src1.shape()]).unwrap_or_else(|| src0.shape().clone());
            let dtype = output_dtype(src0.dtype(), src1.dtype());
            let mut info = TensorInfo::new(shape, dtype);
            if dtype.is_quantized() {
                info = info.with_quantization(src0.quantization_info().clone());
            }
            *dst = info;
        }

        let quantized = src0.dtype().is_quantized();
        let kernel_name = if quantized {
            format!("elementwise_operation_{op}_quantized")
        } else {
            format!("elementwise_operation_{op}")
        };

        let vec_size = BYTES_PER_ITERATION / dst.element_size();
        let mut opts = BuildOptions::new();
        opts.add_option(format!("-DDATA_TYPE_IN1={}", src0.dtype().cl_type_name()));
        opts.add_option(format!("-DDATA_TYPE_IN2={}", src1.dtype().cl_type_name()));
        opts.add_option(format!("-DDATA_TYPE_OUT={}", dst.dtype().cl_type_name()));
        opts.add_option(format!("-DVEC_SIZE={vec_size}"));
        opts.add_option(format!("-DOP={op}"));
        if quantized {
            let (q1, q2, qo) = (
                src0.quantization_info().uniform(),
                src1.quantization_info().uniform(),
                dst.quantization_info().uniform(),
            );
            opts.add_option(format!("-DOFFSET_IN1={}", q1.offset));
            opts.add_option(format!("-DOFFSET_IN2={}", q2.offset));
            opts.add_option(format!("-DOFFSET_OUT={}", qo.offset));
            opts.add_option(format!("-DSCALE_IN1={}", q1.scale));
            opts.add_option(format!("-DSCALE_IN2={}", q2.scale));
            opts.add_option(format!("-DSCALE_OUT={}", qo.scale));
        }
        if op.can_overflow() {
            opts.add_option_if_else(
                policy == ConvertPolicy::Wrap || dst.dtype().is_float(),
                "-DWRAP",
                "-DSATURATE",
            );
        }

        let program = library.create_kernel(&kernel_name, &opts)?;
        let mut core = KernelCore::new(library, program, KernelType::Elementwise);
        core.configure_window(Window::from_shape(dst.shape(), &[vec_size]));
        let mut config_id = format!(
            "{kernel_name}_{}_{}_{}",
            src0.dtype().as_str(),
            dst.shape().dim(0),
            dst.shape().dim(1)
        );
        if op.can_overflow() {
            let policy_id = match policy {
                ConvertPolicy::Wrap => "wrap",
                ConvertPolicy::Saturate => "saturate",
            };
            config_id += &format!("_{policy_id}_{}", format!("{:?}", src0.data_layout()).to_lowercase());
        }
        core.set_config_id(config_id);
        tracing::debug!(kernel = %kernel_name, %op, ?policy, "configured elementwise kernel");

        Ok(Self { core, op, policy })
    }

    pub fn op(&self) -> ArithmeticOp {
        self.op
    }

    pub fn policy(&self) -> ConvertPolicy {
        self.policy
    }
}

impl ClKernel for ElementwiseKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut KernelCore {
        &mut self.core
    }

    fn run(&self, pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError> {
        debug_assert!(window.is_subwindow_of(self.window()), "window outside the kernel's window");
        let src0 = pack.bind(self.name(), TensorSlot::Src0)?;
        let src1 = pack.bind(self.name(), TensorSlot::Src1)?;
        let dst = pack.bind(self.name(), TensorSlot::Dst)?;

        for_each_slice(window, |slice| {
            let (src0, src1, dst) = (src0.clone(), src1.clone(), dst.clone());
            let (op, policy) = (self.op, self.policy);
            enqueue(
                queue,
                self,
                &slice,
                self.lws_hint(),
                self.core.use_dummy_work_items(),
                move || elementwise_slice(op, policy, &src0, &src1, &dst, &slice),
            );
            Ok(())
        })
    }
}

fn same_dims(a: &Shape, b: &Shape) -> bool {
    (0..MAX_DIMS).all(|i| a.dim(i) == b.dim(i))
}

/// Input coordinates feeding output `coords`: dimensions of size 1 repeat.
fn broadcast(coords: &Coords, shape: &Shape) -> Coords {
    let mut out = *coords;
    for (i, c) in out.iter_mut().enumerate() {
        if shape.dim(i) == 1 {
            *c = 0;
        }
    }
    out
}

fn elementwise_slice(
    op: ArithmeticOp,
    policy: ConvertPolicy,
    src0: &BoundTensor,
    src1: &BoundTensor,
    dst: &BoundTensor,
    slice: &Window,
) {
    let a = src0.buffer.to_vec();
    let b = src1.buffer.to_vec();
    let (ca, cb, cd) = (
        ElementCodec::new(&src0.info),
        ElementCodec::new(&src1.info),
        ElementCodec::new(&dst.info),
    );
    let mut out = dst.buffer.bytes();
    for coords in CoordIter::window(slice, dst.info.shape()) {
        let va = ca.load(&a, offset_of(&src0.info, &broadcast(&coords, src0.info.shape())));
        let vb = cb.load(&b, offset_of(&src1.info, &broadcast(&coords, src1.info.shape())));
        let result = op.apply(va, vb);
        let offset = offset_of(&dst.info, &coords);
        match (policy, dst.info.dtype()) {
            (ConvertPolicy::Wrap, DType::U8) => out[offset] = (result as i64).rem_euclid(256) as u8,
            (ConvertPolicy::Wrap, DType::S16) => {
                let wrapped = (result as i64) as i16;
                out[offset..offset + 2].copy_from_slice(&wrapped.to_le_bytes());
            }
            _ => cd.store(&mut out, offset, result),
        }
    }
}
