// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Depthwise 3×3 convolution, NCHW.
//!
//! Every input channel is convolved with `depth_multiplier` 3×3 filters of
//! its own; output channel `c * depth_multiplier + m` holds filter `m` of
//! input channel `c`. The kernel reads a halo equal to the convolution
//! padding around the input, so the input must carry at least that much
//! padding (filled beforehand, e.g. by
//! [`FillBorderKernel`](crate::kernels::FillBorderKernel)).

use device_context::CommandQueue;
use tensor_core::{BorderSize, DType, Shape, Status, TensorError, TensorInfo, Window, MAX_DIMS};

use crate::element::{offset_of, offset_of_signed, CoordIter, ElementCodec};
use crate::kernel::{enqueue, for_each_slice, BoundTensor};
use crate::{BuildOptions, ClKernel, KernelCore, KernelLibrary, KernelType, RuntimeError, TensorPack, TensorSlot};

const OP: &str = "depthwise_convolution";
const KERNEL_SIZE: usize = 3;
const MAX_STRIDE_X: usize = 3;

/// Convolution strides and padding, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PadStrideInfo {
    pub stride_x: usize,
    pub stride_y: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
}

impl PadStrideInfo {
    /// Symmetric padding: `pad_x` left and right, `pad_y` top and bottom.
    pub fn new(stride_x: usize, stride_y: usize, pad_x: usize, pad_y: usize) -> Self {
        Self {
            stride_x,
            stride_y,
            pad_left: pad_x,
            pad_right: pad_x,
            pad_top: pad_y,
            pad_bottom: pad_y,
        }
    }

    pub fn border(&self) -> BorderSize {
        BorderSize::new(self.pad_top, self.pad_right, self.pad_bottom, self.pad_left)
    }

    /// Spatial output size for a `width × height` input.
    pub fn scaled_dimensions(&self, width: usize, height: usize) -> Option<(usize, usize)> {
        let padded_w = width + self.pad_left + self.pad_right;
        let padded_h = height + self.pad_top + self.pad_bottom;
        if self.stride_x == 0 || self.stride_y == 0 || padded_w < KERNEL_SIZE || padded_h < KERNEL_SIZE {
            return None;
        }
        Some((
            (padded_w - KERNEL_SIZE) / self.stride_x + 1,
            (padded_h - KERNEL_SIZE) / self.stride_y + 1,
        ))
    }
}

impl Default for PadStrideInfo {
    fn default() -> Self {
        Self::new(1, 1, 0, 0)
    }
}

/// Output shape of a depthwise convolution of `src`.
pub fn depthwise_output_shape(src: &Shape, conv: &PadStrideInfo, depth_multiplier: usize) -> Option<Shape> {
    let (w, h) = conv.scaled_dimensions(src.dim(0), src.dim(1))?;
    let mut dims = src.dims().to_vec();
    dims.resize(dims.len().max(3), 1);
    dims[0] = w;
    dims[1] = h;
    dims[2] = src.dim(2) * depth_multiplier;
    Some(Shape::new(dims))
}

/// Depthwise 3×3 convolution kernel.
///
/// Slots: `Src0` input, `Src1` weights `[3, 3, C·M]`, optional `Src2`
/// biases `[C·M]`, `Dst`.
#[derive(Debug)]
pub struct DepthwiseConv3x3Kernel {
    core: KernelCore,
    conv: PadStrideInfo,
    depth_multiplier: usize,
    border: BorderSize,
}

impl DepthwiseConv3x3Kernel {
    pub fn validate(
        src: &TensorInfo,
        weights: &TensorInfo,
        biases: Option<&TensorInfo>,
        dst: &TensorInfo,
        conv: &PadStrideInfo,
        depth_multiplier: usize,
    ) -> Status {
        let dtype = src.dtype();
        if !matches!(dtype, DType::QAsymm8 | DType::F16 | DType::F32) {
            return Err(TensorError::UnsupportedDType { op: OP, dtype });
        }
        if weights.dtype() != dtype {
            return Err(TensorError::MismatchingDTypes {
                op: OP,
                lhs: dtype,
                rhs: weights.dtype(),
            });
        }
        if weights.shape().dim(0) != KERNEL_SIZE || weights.shape().dim(1) != KERNEL_SIZE {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: format!("weights must be 3x3, got {}", weights.shape()),
            });
        }
        if !(1..=MAX_STRIDE_X).contains(&conv.stride_x) || conv.stride_y == 0 {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: format!("stride ({}, {}) not supported", conv.stride_x, conv.stride_y),
            });
        }
        if depth_multiplier == 0 || weights.shape().dim(2) != src.shape().dim(2) * depth_multiplier {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: format!(
                    "{} weight channels for {} input channels with depth multiplier {depth_multiplier}",
                    weights.shape().dim(2),
                    src.shape().dim(2)
                ),
            });
        }

        if let Some(biases) = biases {
            let expected = if dtype.is_quantized() { DType::S32 } else { dtype };
            if biases.dtype() != expected {
                return Err(TensorError::MismatchingDTypes {
                    op: OP,
                    lhs: expected,
                    rhs: biases.dtype(),
                });
            }
            if biases.shape().rank() > 1 || biases.shape().dim(0) != weights.shape().dim(2) {
                return Err(TensorError::ShapeMismatch {
                    op: OP,
                    lhs: Shape::vector(weights.shape().dim(2)),
                    rhs: biases.shape().clone(),
                });
            }
        }

        let Some(expected) = depthwise_output_shape(src.shape(), conv, depth_multiplier) else {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: format!("input {} too small for the convolution", src.shape()),
            });
        };
        if dst.is_initialised() {
            if dst.shape() != &expected {
                return Err(TensorError::ShapeMismatch {
                    op: OP,
                    lhs: expected,
                    rhs: dst.shape().clone(),
                });
            }
            if dst.dtype() != dtype {
                return Err(TensorError::MismatchingDTypes {
                    op: OP,
                    lhs: dtype,
                    rhs: dst.dtype(),
                });
            }
        }

        // a fixed input must already carry the halo
        let border = conv.border();
        if !src.is_resizable() && !src.padding().covers(&border) {
            return Err(TensorError::InsufficientPadding {
                op: OP,
                required: border,
                available: src.padding(),
            });
        }
        Ok(())
    }

    /// Configures the kernel, growing the input padding to the halo when
    /// the input is still resizable.
    pub fn configure(
        library: &KernelLibrary,
        src: &mut TensorInfo,
        weights: &TensorInfo,
        biases: Option<&TensorInfo>,
        dst: &mut TensorInfo,
        conv: PadStrideInfo,
        depth_multiplier: usize,
    ) -> Result<Self, RuntimeError> {
        Self::validate(src, weights, biases, dst, &conv, depth_multiplier)?;
        let dtype = src.dtype();
        if !dst.is_initialised() {
            let shape = depthwise_output_shape(src.shape(), &conv, depth_multiplier)
                .unwrap_or_else(|| src.shape().clone());
            *dst = TensorInfo::new(shape, dtype).with_quantization(src.quantization_info().clone());
        }

        let border = conv.border();
        if src.is_resizable() && src.extend_padding(border) {
            tracing::debug!(?border, "depthwise input padding extended");
        }

        let is_quantized = dtype.is_quantized_asymmetric();
        let mut opts = BuildOptions::new();
        opts.add_option(format!("-DDATA_TYPE={}", dtype.cl_type_name()));
        opts.add_option(format!("-DDEPTH_MULTIPLIER={depth_multiplier}"));
        opts.add_option(format!("-DCONV_STRIDE_X={}", conv.stride_x));
        opts.add_option(format!("-DCONV_STRIDE_Y={}", conv.stride_y));
        opts.add_option(format!("-DCONV_PAD_TOP={}", conv.pad_top));
        opts.add_option(format!("-DCONV_PAD_LEFT={}", conv.pad_left));
        opts.add_option_if(biases.is_some(), "-DHAS_BIAS");
        if is_quantized {
            let (iq, wq, oq) = (
                src.quantization_info().uniform(),
                weights.quantization_info().uniform(),
                dst.quantization_info().uniform(),
            );
            opts.add_option(format!("-DINPUT_OFFSET={}", -iq.offset));
            opts.add_option(format!("-DWEIGHTS_OFFSET={}", -wq.offset));
            opts.add_option(format!("-DOUTPUT_OFFSET={}", oq.offset));
            opts.add_option(format!("-DK_OFFSET={}", 9 * iq.offset * wq.offset));
            opts.add_option(format!("-DREAL_MULTIPLIER={}", iq.scale * wq.scale / oq.scale));
        }

        let kernel_name = if is_quantized {
            let dot8 = if library.device().dot8_support() { "_dot8" } else { "" };
            format!("depthwise_convolution_3x3_quantized{dot8}_nchw")
        } else {
            "depthwise_convolution_3x3".to_string()
        };
        let program = library.create_kernel(&kernel_name, &opts)?;

        let elems_per_iteration = (8 / dst.element_size()).max(1);
        let mut core = KernelCore::new(library, program, KernelType::Depthwise);
        core.configure_window(Window::from_shape(dst.shape(), &[elems_per_iteration, 1]));
        core.set_config_id(format!(
            "{kernel_name}_{}_{}_{}_{}_{}_{}",
            dtype.as_str(),
            src.shape().dim(0),
            src.shape().dim(1),
            src.shape().dim(2),
            dst.shape().dim(0),
            dst.shape().dim(1)
        ));
        tracing::debug!(kernel = %kernel_name, ?conv, depth_multiplier, "configured depthwise kernel");

        Ok(Self {
            core,
            conv,
            depth_multiplier,
            border,
        })
    }

    pub fn conv_info(&self) -> &PadStrideInfo {
        &self.conv
    }

    pub fn depth_multiplier(&self) -> usize {
        self.depth_multiplier
    }
}

impl ClKernel for DepthwiseConv3x3Kernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut KernelCore {
        &mut self.core
    }

    fn border_size(&self) -> BorderSize {
        self.border
    }

    fn run(&self, pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError> {
        debug_assert!(window.is_subwindow_of(self.window()), "window outside the kernel's window");
        let src = pack.bind(self.name(), TensorSlot::Src0)?;
        let weights = pack.bind(self.name(), TensorSlot::Src1)?;
        let biases = pack.bind_optional(self.name(), TensorSlot::Src2)?;
        let dst = pack.bind(self.name(), TensorSlot::Dst)?;

        for_each_slice(window, |slice| {
            let body = DepthwiseSlice {
                conv: self.conv,
                depth_multiplier: self.depth_multiplier,
                src: src.clone(),
                weights: weights.clone(),
                biases: biases.clone(),
                dst: dst.clone(),
                slice,
            };
            enqueue(
                queue,
                self,
                &slice,
                self.lws_hint(),
                self.core.use_dummy_work_items(),
                move || body.execute(),
            );
            Ok(())
        })
    }
}

struct DepthwiseSlice {
    conv: PadStrideInfo,
    depth_multiplier: usize,
    src: BoundTensor,
    weights: BoundTensor,
    biases: Option<BoundTensor>,
    dst: BoundTensor,
    slice: Window,
}

impl DepthwiseSlice {
    fn execute(self) {
        let input = self.src.buffer.to_vec();
        let weights = self.weights.buffer.to_vec();
        let biases = self.biases.as_ref().map(|b| b.buffer.to_vec());
        let (cs, cw, cd) = (
            ElementCodec::new(&self.src.info),
            ElementCodec::new(&self.weights.info),
            ElementCodec::new(&self.dst.info),
        );
        // quantized biases are stored in the accumulator scale
        let bias_scale = if self.src.info.dtype().is_quantized() {
            self.src.info.quantization_info().uniform().scale * self.weights.info.quantization_info().uniform().scale
        } else {
            1.0
        };

        let mut out = self.dst.buffer.bytes();
        for coords in CoordIter::window(&self.slice, self.dst.info.shape()) {
            let channel = coords[2];
            let in_channel = channel / self.depth_multiplier;
            let x0 = (coords[0] * self.conv.stride_x) as isize - self.conv.pad_left as isize;
            let y0 = (coords[1] * self.conv.stride_y) as isize - self.conv.pad_top as isize;

            let mut acc = 0.0f32;
            for ky in 0..KERNEL_SIZE {
                for kx in 0..KERNEL_SIZE {
                    let mut at = [0isize; MAX_DIMS];
                    for (a, c) in at.iter_mut().zip(coords.iter()) {
                        *a = *c as isize;
                    }
                    at[0] = x0 + kx as isize;
                    at[1] = y0 + ky as isize;
                    at[2] = in_channel as isize;
                    let v = cs.load(&input, offset_of_signed(&self.src.info, &at));

                    let mut wc = [0; MAX_DIMS];
                    wc[0] = kx;
                    wc[1] = ky;
                    wc[2] = channel;
                    acc += v * cw.load(&weights, offset_of(&self.weights.info, &wc));
                }
            }
            if let (Some(info), Some(bytes)) = (self.biases.as_ref().map(|b| &b.info), biases.as_ref()) {
                let mut bc = [0; MAX_DIMS];
                bc[0] = channel;
                acc += ElementCodec::new(info).load(bytes, offset_of(info, &bc)) * bias_scale;
            }
            cd.store(&mut out, offset_of(&self.dst.info, &coords), acc);
        }
    }
}
