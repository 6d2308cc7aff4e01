// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Floating-point matrix multiplication.
//!
//! Shapes are x-first: the left operand is `[K, M]` (K columns, M rows),
//! the right operand `[N, K]` and the output `[N, M]`. Dimensions above
//! the second are batches; a 2-D right operand is shared by every batch.

use device_context::{CommandQueue, GpuArch};
use tensor_core::{DType, Shape, Status, TensorError, TensorInfo, Window};

use crate::element::{offset_of, ElementCodec};
use crate::kernel::{enqueue, for_each_slice, BoundTensor};
use crate::{BuildOptions, ClKernel, KernelCore, KernelLibrary, KernelType, RuntimeError, TensorPack, TensorSlot};

/// Output elements computed by one work item along x and y.
const ELEMS_PER_ITEM_X: usize = 4;
const ELEMS_PER_ITEM_Y: usize = 4;

const OP: &str = "gemm";

/// `dst = alpha * (src0 × src1)`.
///
/// Slots: `Src0` (left), `Src1` (right), `Dst`.
#[derive(Debug)]
pub struct GemmKernel {
    core: KernelCore,
    alpha: f32,
}

/// Output shape of `lhs × rhs`.
pub fn gemm_output_shape(lhs: &Shape, rhs: &Shape) -> Shape {
    let mut dims = lhs.dims().to_vec();
    dims.resize(dims.len().max(2), 1);
    dims[0] = rhs.dim(0);
    Shape::new(dims)
}

impl GemmKernel {
    pub fn validate(src0: &TensorInfo, src1: &TensorInfo, dst: &TensorInfo, alpha: f32) -> Status {
        if !alpha.is_finite() {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: format!("alpha must be finite, got {alpha}"),
            });
        }
        if !matches!(src0.dtype(), DType::F32 | DType::F16) {
            return Err(TensorError::UnsupportedDType { op: OP, dtype: src0.dtype() });
        }
        if src0.dtype() != src1.dtype() {
            return Err(TensorError::MismatchingDTypes {
                op: OP,
                lhs: src0.dtype(),
                rhs: src1.dtype(),
            });
        }
        if src0.shape().dim(0) != src1.shape().dim(1) {
            return Err(TensorError::ShapeMismatch {
                op: OP,
                lhs: src0.shape().clone(),
                rhs: src1.shape().clone(),
            });
        }
        if src1.shape().rank() > 2 && src1.shape().collapsed_from(2) != src0.shape().collapsed_from(2) {
            return Err(TensorError::ShapeMismatch {
                op: OP,
                lhs: src0.shape().clone(),
                rhs: src1.shape().clone(),
            });
        }

        if dst.is_initialised() {
            if dst.dtype() != src0.dtype() {
                return Err(TensorError::MismatchingDTypes {
                    op: OP,
                    lhs: src0.dtype(),
                    rhs: dst.dtype(),
                });
            }
            let expected = gemm_output_shape(src0.shape(), src1.shape());
            if dst.shape() != &expected {
                return Err(TensorError::ShapeMismatch {
                    op: OP,
                    lhs: expected,
                    rhs: dst.shape().clone(),
                });
            }
        }
        Ok(())
    }

    pub fn configure(
        library: &KernelLibrary,
        src0: &TensorInfo,
        src1: &TensorInfo,
        dst: &mut TensorInfo,
        alpha: f32,
    ) -> Result<Self, RuntimeError> {
        Self::validate(src0, src1, dst, alpha)?;
        if !dst.is_initialised() {
            *dst = TensorInfo::new(gemm_output_shape(src0.shape(), src1.shape()), src0.dtype());
        }

        let device = library.device();
        let kernel_name = if src0.dtype() == DType::F32 && device.gpu_arch() == GpuArch::Bifrost {
            "gemm_mm_floating_point_f32_bifrost"
        } else {
            "gemm_mm_floating_point"
        };

        let mut opts = BuildOptions::new();
        opts.add_option(format!("-DDATA_TYPE={}", src0.dtype().cl_type_name()));
        opts.add_option(format!("-DCOLS_A={}", src0.shape().dim(0)));
        opts.add_option(format!("-DNUM_ELEMS_PROCESSED_PER_THREAD_X={ELEMS_PER_ITEM_X}"));
        opts.add_option(format!("-DNUM_ELEMS_PROCESSED_PER_THREAD_Y={ELEMS_PER_ITEM_Y}"));
        opts.add_option_if(alpha != 1.0, format!("-DALPHA={alpha}"));
        opts.add_option_if(src1.shape().rank() <= 2, "-DMATRIX_B_DEPTH=1");

        let program = library.create_kernel(kernel_name, &opts)?;
        let mut core = KernelCore::new(library, program, KernelType::Gemm);
        core.set_use_dummy_work_items(device.preferred_dummy_work_items_support());
        core.configure_window(Window::from_shape(dst.shape(), &[ELEMS_PER_ITEM_X, ELEMS_PER_ITEM_Y]));
        core.set_config_id(format!(
            "{kernel_name}_{}_{}_{}_{}_{}",
            dst.dtype().as_str(),
            dst.shape().dim(1),
            dst.shape().dim(0),
            dst.shape().dim(2),
            src0.shape().dim(0)
        ));
        tracing::debug!(kernel = kernel_name, alpha, config_id = core.config_id(), "configured gemm kernel");

        Ok(Self { core, alpha })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl ClKernel for GemmKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut KernelCore {
        &mut self.core
    }

    fn run(&self, pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError> {
        debug_assert!(window.is_subwindow_of(self.window()), "window outside the kernel's window");
        let lhs = pack.bind(self.name(), TensorSlot::Src0)?;
        let rhs = pack.bind(self.name(), TensorSlot::Src1)?;
        let dst = pack.bind(self.name(), TensorSlot::Dst)?;

        for_each_slice(window, |slice| {
            let (lhs, rhs, dst) = (lhs.clone(), rhs.clone(), dst.clone());
            let alpha = self.alpha;
            enqueue(
                queue,
                self,
                &slice,
                self.lws_hint(),
                self.core.use_dummy_work_items(),
                move || gemm_slice(alpha, &lhs, &rhs, &dst, &slice),
            );
            Ok(())
        })
    }
}

/// Computes the output block covered by `slice`, one row at a time with an
/// ikj loop so the inner loop walks a row of the right operand.
fn gemm_slice(alpha: f32, lhs: &BoundTensor, rhs: &BoundTensor, dst: &BoundTensor, slice: &Window) {
    let a = lhs.buffer.to_vec();
    let b = rhs.buffer.to_vec();
    let (ca, cb, cd) = (
        ElementCodec::new(&lhs.info),
        ElementCodec::new(&rhs.info),
        ElementCodec::new(&dst.info),
    );
    let out_shape = dst.info.shape();
    let k_dim = lhs.info.shape().dim(0);
    let shared_rhs = rhs.info.shape().rank() <= 2;

    let x_range = slice.x().start()..slice.x().end().min(out_shape.dim(0));
    let y_range = slice.y().start()..slice.y().end().min(out_shape.dim(1));
    let mut row = vec![0.0f32; x_range.len()];

    let mut out = dst.buffer.bytes();
    let batches = crate::element::CoordIter::window(&batch_window(slice), out_shape);
    for batch in batches {
        for y in y_range.clone() {
            row.iter_mut().for_each(|v| *v = 0.0);
            for k in 0..k_dim {
                let mut ac = batch;
                ac[0] = k;
                ac[1] = y;
                let a_yk = ca.load(&a, offset_of(&lhs.info, &ac));
                let mut bc = if shared_rhs { [0; tensor_core::MAX_DIMS] } else { batch };
                bc[1] = k;
                for (i, x) in x_range.clone().enumerate() {
                    bc[0] = x;
                    row[i] += a_yk * cb.load(&b, offset_of(&rhs.info, &bc));
                }
            }
            let mut oc = batch;
            oc[1] = y;
            for (i, x) in x_range.clone().enumerate() {
                oc[0] = x;
                cd.store(&mut out, offset_of(&dst.info, &oc), alpha * row[i]);
            }
        }
    }
}

/// `slice` with x and y collapsed to their first element, leaving only the
/// batch dimensions to iterate.
fn batch_window(slice: &Window) -> Window {
    let mut window = *slice;
    window.set(Window::DIM_X, tensor_core::Dimension::new(0, 1, 1));
    window.set(Window::DIM_Y, tensor_core::Dimension::new(0, 1, 1));
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::{ClContext, DeviceOptions, DeviceProperties, NdRange};

    use crate::ClTensor;

    fn f32_info(shape: Shape) -> TensorInfo {
        TensorInfo::new(shape, DType::F32)
    }

    #[test]
    fn test_validate() {
        let a = f32_info(Shape::d2(3, 2));
        let b = f32_info(Shape::d2(2, 3));
        assert!(GemmKernel::validate(&a, &b, &TensorInfo::default(), 1.0).is_ok());
        assert!(GemmKernel::validate(&a, &b, &f32_info(Shape::d2(2, 2)), 1.0).is_ok());

        let bad_k = f32_info(Shape::d2(2, 4));
        assert!(matches!(
            GemmKernel::validate(&a, &bad_k, &TensorInfo::default(), 1.0),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            GemmKernel::validate(&a, &b, &f32_info(Shape::d2(3, 2)), 1.0),
            Err(TensorError::ShapeMismatch { .. })
        ));
        let s32 = TensorInfo::new(Shape::d2(3, 2), DType::S32);
        assert!(matches!(
            GemmKernel::validate(&s32, &s32, &TensorInfo::default(), 1.0),
            Err(TensorError::UnsupportedDType { .. })
        ));
        assert!(GemmKernel::validate(&a, &b, &TensorInfo::default(), f32::NAN).is_err());
    }

    #[test]
    fn test_configure() {
        let library = KernelLibrary::new(DeviceOptions::default());
        let mut dst = TensorInfo::default();
        let kernel = GemmKernel::configure(
            &library,
            &f32_info(Shape::d2(3, 300)),
            &f32_info(Shape::d2(8, 3)),
            &mut dst,
            2.0,
        )
        .unwrap();
        assert_eq!(dst.shape(), &Shape::d2(8, 300));
        assert_eq!(kernel.name(), "gemm_mm_floating_point_f32_bifrost");
        assert!(kernel.core().program().build_options().contains("-DALPHA=2"));
        assert!(kernel.core().use_dummy_work_items());
        // gws (2, 75, 1): x <= 256 and z == 1
        assert_eq!(kernel.lws_hint(), NdRange::new(32, 4, 1));
        assert_eq!(kernel.config_id(), "gemm_mm_floating_point_f32_bifrost_f32_300_8_1_3");

        let midgard = KernelLibrary::new(DeviceOptions::from_properties(&DeviceProperties {
            name: "Mali-T880".to_string(),
            ..DeviceProperties::mali_g76()
        }));
        let kernel = GemmKernel::configure(
            &midgard,
            &f32_info(Shape::d2(3, 2)),
            &f32_info(Shape::d2(2, 3)),
            &mut TensorInfo::default(),
            1.0,
        )
        .unwrap();
        assert_eq!(kernel.name(), "gemm_mm_floating_point");
    }

    #[test]
    fn test_matmul_2x3_times_3x2() {
        // A = [[1, 2, 3], [4, 5, 6]], B = [[7, 8], [9, 10], [11, 12]]
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let library = KernelLibrary::new(ctx.options().clone());

        let mut a = ClTensor::new(&ctx, f32_info(Shape::d2(3, 2)));
        let mut b = ClTensor::new(&ctx, f32_info(Shape::d2(2, 3)));
        let mut c = ClTensor::empty(&ctx);
        let kernel = GemmKernel::configure(&library, a.info(), b.info(), c.info_mut(), 0.5).unwrap();
        for t in [&mut a, &mut b, &mut c] {
            t.allocate().unwrap();
        }
        a.copy_from_f32(&queue, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        b.copy_from_f32(&queue, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();

        let pack = TensorPack::new()
            .with(TensorSlot::Src0, &a)
            .with(TensorSlot::Src1, &b)
            .with(TensorSlot::Dst, &c);
        kernel.run(&pack, kernel.window(), &queue).unwrap();
        assert_eq!(c.to_f32_vec(&queue).unwrap(), vec![29.0, 32.0, 69.5, 77.0]);
    }

    #[test]
    fn test_batched_with_shared_rhs() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let library = KernelLibrary::new(ctx.options().clone());

        let mut a = ClTensor::new(&ctx, f32_info(Shape::d3(2, 1, 2)));
        let mut b = ClTensor::new(&ctx, f32_info(Shape::d2(2, 2)));
        let mut c = ClTensor::empty(&ctx);
        let kernel = GemmKernel::configure(&library, a.info(), b.info(), c.info_mut(), 1.0).unwrap();
        assert_eq!(c.info().shape(), &Shape::d3(2, 1, 2));
        for t in [&mut a, &mut b, &mut c] {
            t.allocate().unwrap();
        }
        a.copy_from_f32(&queue, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        b.copy_from_f32(&queue, &[1.0, 2.0, 3.0, 4.0]).unwrap();

        let pack = TensorPack::new()
            .with(TensorSlot::Src0, &a)
            .with(TensorSlot::Src1, &b)
            .with(TensorSlot::Dst, &c);
        kernel.run(&pack, kernel.window(), &queue).unwrap();
        // batch 0 selects row 0 of B, batch 1 selects row 1
        assert_eq!(c.to_f32_vec(&queue).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
