// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 2-D max/average pooling over the x/y plane of NCHW tensors.

use device_context::CommandQueue;
use tensor_core::{DType, Shape, Status, TensorError, TensorInfo, Window};

use crate::element::{offset_of, CoordIter, ElementCodec};
use crate::kernel::{enqueue, for_each_slice, BoundTensor};
use crate::{BuildOptions, ClKernel, KernelCore, KernelLibrary, KernelType, RuntimeError, TensorPack, TensorSlot};

const OP: &str = "pooling";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PoolType {
    Max,
    Avg,
}

/// Square pooling window with a uniform stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolingInfo {
    pub pool_type: PoolType,
    pub pool_size: usize,
    pub stride: usize,
}

impl PoolingInfo {
    pub fn new(pool_type: PoolType, pool_size: usize, stride: usize) -> Self {
        Self {
            pool_type,
            pool_size,
            stride,
        }
    }

    /// Output shape for an input of `shape`, or `None` if the pool does
    /// not fit.
    pub fn output_shape(&self, shape: &Shape) -> Option<Shape> {
        if self.pool_size == 0 || self.stride == 0 {
            return None;
        }
        let (w, h) = (shape.dim(0), shape.dim(1));
        if self.pool_size > w || self.pool_size > h {
            return None;
        }
        let mut dims = shape.dims().to_vec();
        dims.resize(dims.len().max(2), 1);
        dims[0] = (w - self.pool_size) / self.stride + 1;
        dims[1] = (h - self.pool_size) / self.stride + 1;
        Some(Shape::new(dims))
    }
}

/// Pooling kernel.
///
/// Slots: `Src0`, `Dst`.
#[derive(Debug)]
pub struct PoolingKernel {
    core: KernelCore,
    pool: PoolingInfo,
}

impl PoolingKernel {
    pub fn validate(src: &TensorInfo, dst: &TensorInfo, pool: &PoolingInfo) -> Status {
        if !matches!(src.dtype(), DType::F32 | DType::F16 | DType::QAsymm8) {
            return Err(TensorError::UnsupportedDType { op: OP, dtype: src.dtype() });
        }
        let Some(expected) = pool.output_shape(src.shape()) else {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: format!(
                    "pool size {} with stride {} does not fit input {}",
                    pool.pool_size,
                    pool.stride,
                    src.shape()
                ),
            });
        };

        if dst.is_initialised() {
            if dst.dtype() != src.dtype() {
                return Err(TensorError::MismatchingDTypes {
                    op: OP,
                    lhs: src.dtype(),
                    rhs: dst.dtype(),
                });
            }
            if dst.shape() != &expected {
                return Err(TensorError::ShapeMismatch {
                    op: OP,
                    lhs: expected,
                    rhs: dst.shape().clone(),
                });
            }
            if src.dtype().is_quantized() && dst.quantization_info() != src.quantization_info() {
                return Err(TensorError::Quantization {
                    op: OP,
                    detail: "input and output quantization must match".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn configure(
        library: &KernelLibrary,
        src: &TensorInfo,
        dst: &mut TensorInfo,
        pool: PoolingInfo,
    ) -> Result<Self, RuntimeError> {
        Self::validate(src, dst, &pool)?;
        if !dst.is_initialised() {
            let shape = pool.output_shape(src.shape()).unwrap_or_else(|| src.shape().clone());
            *dst = TensorInfo::new(shape, src.dtype()).with_quantization(src.quantization_info().clone());
        }

        let kernel_name = match (src.dtype().is_quantized(), pool.pool_size) {
            (true, _) => "pooling_layer_N_quantized".to_string(),
            (false, 2 | 3) => format!("pooling_layer_{}", pool.pool_size),
            (false, _) => "pooling_layer_N".to_string(),
        };

        let mut opts = BuildOptions::new();
        opts.add_option(format!("-DDATA_TYPE={}", src.dtype().cl_type_name()));
        opts.add_option_if_else(pool.pool_type == PoolType::Max, "-DPOOL_MAX", "-DPOOL_AVG");
        opts.add_option(format!("-DPOOL_SIZE_X={}", pool.pool_size));
        opts.add_option(format!("-DPOOL_SIZE_Y={}", pool.pool_size));
        opts.add_option(format!("-DSTRIDE_X={}", pool.stride));
        opts.add_option(format!("-DSTRIDE_Y={}", pool.stride));
        opts.add_option(format!("-DMAX_WIDTH={}", src.shape().dim(0)));
        opts.add_option(format!("-DMAX_HEIGHT={}", src.shape().dim(1)));

        let program = library.create_kernel(&kernel_name, &opts)?;
        let mut core = KernelCore::new(library, program, KernelType::Pool);
        core.configure_window(Window::from_shape(dst.shape(), &[1]));
        core.set_config_id(format!(
            "{kernel_name}_{}_{}_{}_{}",
            src.dtype().as_str(),
            dst.shape().dim(0),
            dst.shape().dim(1),
            dst.shape().dim(2)
        ));
        tracing::debug!(kernel = %kernel_name, ?pool, "configured pooling kernel");

        Ok(Self { core, pool })
    }

    pub fn pooling_info(&self) -> &PoolingInfo {
        &self.pool
    }
}

impl ClKernel for PoolingKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut KernelCore {
        &mut self.core
    }

    fn run(&self, pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError> {
        debug_assert!(window.is_subwindow_of(self.window()), "window outside the kernel's window");
        let src = pack.bind(self.name(), TensorSlot::Src0)?;
        let dst = pack.bind(self.name(), TensorSlot::Dst)?;

        for_each_slice(window, |slice| {
            let (src, dst, pool) = (src.clone(), dst.clone(), self.pool);
            enqueue(
                queue,
                self,
                &slice,
                self.lws_hint(),
                self.core.use_dummy_work_items(),
                move || pool_slice(&pool, &src, &dst, &slice),
            );
            Ok(())
        })
    }
}

fn pool_slice(pool: &PoolingInfo, src: &BoundTensor, dst: &BoundTensor, slice: &Window) {
    let input = src.buffer.to_vec();
    let (cs, cd) = (ElementCodec::new(&src.info), ElementCodec::new(&dst.info));
    let mut out = dst.buffer.bytes();
    for coords in CoordIter::window(slice, dst.info.shape()) {
        let (x0, y0) = (coords[0] * pool.stride, coords[1] * pool.stride);
        let mut acc = match pool.pool_type {
            PoolType::Max => f32::NEG_INFINITY,
            PoolType::Avg => 0.0,
        };
        for y in y0..y0 + pool.pool_size {
            for x in x0..x0 + pool.pool_size {
                let mut c = coords;
                c[0] = x;
                c[1] = y;
                let v = cs.load(&input, offset_of(&src.info, &c));
                acc = match pool.pool_type {
                    PoolType::Max => acc.max(v),
                    PoolType::Avg => acc + v,
                };
            }
        }
        if pool.pool_type == PoolType::Avg {
            acc /= (pool.pool_size * pool.pool_size) as f32;
        }
        cd.store(&mut out, offset_of(&dst.info, &coords), acc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::{ClContext, DeviceOptions};
    use tensor_core::QuantizationInfo;

    use crate::ClTensor;

    #[test]
    fn test_output_shape() {
        let pool = PoolingInfo::new(PoolType::Max, 2, 2);
        assert_eq!(pool.output_shape(&Shape::d3(4, 6, 3)), Some(Shape::d3(2, 3, 3)));
        assert_eq!(PoolingInfo::new(PoolType::Avg, 3, 1).output_shape(&Shape::d2(5, 5)), Some(Shape::d2(3, 3)));
        assert_eq!(PoolingInfo::new(PoolType::Avg, 7, 1).output_shape(&Shape::d2(5, 5)), None);
        assert_eq!(PoolingInfo::new(PoolType::Avg, 2, 0).output_shape(&Shape::d2(5, 5)), None);
    }

    #[test]
    fn test_validate() {
        let src = TensorInfo::new(Shape::d2(4, 4), DType::F32);
        let pool = PoolingInfo::new(PoolType::Max, 2, 2);
        assert!(PoolingKernel::validate(&src, &TensorInfo::default(), &pool).is_ok());
        let wrong = TensorInfo::new(Shape::d2(3, 3), DType::F32);
        assert!(matches!(
            PoolingKernel::validate(&src, &wrong, &pool),
            Err(TensorError::ShapeMismatch { .. })
        ));
        let u8_src = TensorInfo::new(Shape::d2(4, 4), DType::U8);
        assert!(matches!(
            PoolingKernel::validate(&u8_src, &TensorInfo::default(), &pool),
            Err(TensorError::UnsupportedDType { .. })
        ));

        let q_src = TensorInfo::new(Shape::d2(4, 4), DType::QAsymm8).with_quantization(QuantizationInfo::new(0.5, 1));
        let q_dst = TensorInfo::new(Shape::d2(2, 2), DType::QAsymm8).with_quantization(QuantizationInfo::new(0.25, 1));
        assert!(matches!(
            PoolingKernel::validate(&q_src, &q_dst, &pool),
            Err(TensorError::Quantization { .. })
        ));
    }

    #[test]
    fn test_kernel_selection() {
        let library = KernelLibrary::new(DeviceOptions::default());
        let src = TensorInfo::new(Shape::d3(8, 8, 2), DType::F32);
        let k2 = PoolingKernel::configure(&library, &src, &mut TensorInfo::default(), PoolingInfo::new(PoolType::Max, 2, 2)).unwrap();
        let k5 = PoolingKernel::configure(&library, &src, &mut TensorInfo::default(), PoolingInfo::new(PoolType::Avg, 5, 1)).unwrap();
        assert_eq!(k2.name(), "pooling_layer_2");
        assert_eq!(k5.name(), "pooling_layer_N");
        assert_eq!(k2.config_id(), "pooling_layer_2_f32_4_4_2");
        // both live in the same program but were built with different options
        assert_eq!(library.num_built_programs(), 2);
    }

    #[test]
    fn test_max_and_avg() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let library = KernelLibrary::new(ctx.options().clone());

        let mut src = ClTensor::new(&ctx, TensorInfo::new(Shape::d3(4, 2, 2), DType::F32));
        let mut max = ClTensor::empty(&ctx);
        let mut avg = ClTensor::empty(&ctx);
        let k_max = PoolingKernel::configure(&library, src.info(), max.info_mut(), PoolingInfo::new(PoolType::Max, 2, 2)).unwrap();
        let k_avg = PoolingKernel::configure(&library, src.info(), avg.info_mut(), PoolingInfo::new(PoolType::Avg, 2, 2)).unwrap();
        for t in [&mut src, &mut max, &mut avg] {
            t.allocate().unwrap();
        }
        #[rustfmt::skip]
        src.copy_from_f32(&queue, &[
            1.0, 2.0, 3.0, 4.0,
            5.0, 6.0, 7.0, 8.0,
            -1.0, -2.0, -3.0, -4.0,
            -5.0, -6.0, -7.0, -8.0,
        ]).unwrap();

        let base = TensorPack::new().with(TensorSlot::Src0, &src);
        k_max.run(&base.with(TensorSlot::Dst, &max), k_max.window(), &queue).unwrap();
        k_avg.run(&base.with(TensorSlot::Dst, &avg), k_avg.window(), &queue).unwrap();
        assert_eq!(max.to_f32_vec(&queue).unwrap(), vec![6.0, 8.0, -1.0, -3.0]);
        assert_eq!(avg.to_f32_vec(&queue).unwrap(), vec![3.5, 5.5, -3.5, -5.5]);
    }
}
