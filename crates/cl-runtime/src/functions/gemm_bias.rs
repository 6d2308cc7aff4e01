// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `dst = alpha * (a × b) + bias`.

use tensor_core::{Status, TensorInfo};

use super::ClFunction;
use crate::kernels::{gemm_output_shape, ArithmeticOp, ConvertPolicy, ElementwiseKernel, GemmKernel};
use crate::{ClTensor, RuntimeError, Scheduler, TensorPack, TensorSlot};
use memory_manager::MemoryGroup;

/// Matrix multiply followed by a broadcast bias add.
///
/// The product lives in an intermediate tensor managed by the function's
/// memory group, so its memory is only held while the function runs.
///
/// Slots: `Src0` (a), `Src1` (b), `Src2` (bias), `Dst`.
#[derive(Debug)]
pub struct GemmWithBias {
    memory_group: MemoryGroup,
    gemm: GemmKernel,
    add: ElementwiseKernel,
    product: ClTensor,
}

impl GemmWithBias {
    pub fn validate(a: &TensorInfo, b: &TensorInfo, bias: &TensorInfo, dst: &TensorInfo, alpha: f32) -> Status {
        GemmKernel::validate(a, b, &TensorInfo::default(), alpha)?;
        let product = TensorInfo::new(gemm_output_shape(a.shape(), b.shape()), a.dtype());
        ElementwiseKernel::validate(&product, bias, dst)
    }

    pub fn configure(
        scheduler: &Scheduler,
        a: &TensorInfo,
        b: &TensorInfo,
        bias: &TensorInfo,
        dst: &mut TensorInfo,
        alpha: f32,
    ) -> Result<Self, RuntimeError> {
        Self::validate(a, b, bias, dst, alpha)?;
        let library = scheduler.library();
        let memory_group = scheduler.new_memory_group();

        let mut product = ClTensor::empty(scheduler.context());
        product.allocator_mut().set_alignment(scheduler.config().alignment);
        product.associate_memory_group(&memory_group);

        let gemm = GemmKernel::configure(library, a, b, product.info_mut(), alpha)?;
        let add = ElementwiseKernel::configure(
            library,
            ArithmeticOp::Add,
            product.info(),
            bias,
            dst,
            ConvertPolicy::Saturate,
        )?;
        // last consumer configured: the product's lifetime ends here
        product.allocate()?;

        Ok(Self {
            memory_group,
            gemm,
            add,
            product,
        })
    }

    pub fn memory_group(&self) -> &MemoryGroup {
        &self.memory_group
    }
}

impl ClFunction for GemmWithBias {
    fn run(&mut self, pack: &TensorPack<'_>, scheduler: &Scheduler) -> Result<(), RuntimeError> {
        let missing = |slot| RuntimeError::MissingTensor {
            kernel: "gemm_with_bias".to_string(),
            slot,
        };
        let a = pack.get(TensorSlot::Src0).ok_or_else(|| missing(TensorSlot::Src0))?;
        let b = pack.get(TensorSlot::Src1).ok_or_else(|| missing(TensorSlot::Src1))?;
        let bias = pack.get(TensorSlot::Src2).ok_or_else(|| missing(TensorSlot::Src2))?;
        let dst = pack.get(TensorSlot::Dst).ok_or_else(|| missing(TensorSlot::Dst))?;

        let _scope = self.memory_group.scope()?;
        let gemm_pack = TensorPack::new()
            .with(TensorSlot::Src0, a)
            .with(TensorSlot::Src1, b)
            .with(TensorSlot::Dst, &self.product);
        scheduler.enqueue(&self.gemm, &gemm_pack, false)?;

        let add_pack = TensorPack::new()
            .with(TensorSlot::Src0, &self.product)
            .with(TensorSlot::Src1, bias)
            .with(TensorSlot::Dst, dst);
        // flushed before the scope hands the product's memory back
        scheduler.enqueue(&self.add, &add_pack, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{DType, Shape, TensorError};

    use crate::RuntimeConfig;

    #[test]
    fn test_validate() {
        let a = TensorInfo::new(Shape::d2(3, 2), DType::F32);
        let b = TensorInfo::new(Shape::d2(4, 3), DType::F32);
        let bias = TensorInfo::new(Shape::d2(4, 1), DType::F32);
        assert!(GemmWithBias::validate(&a, &b, &bias, &TensorInfo::default(), 1.0).is_ok());

        let wide_bias = TensorInfo::new(Shape::d2(5, 1), DType::F32);
        assert!(matches!(
            GemmWithBias::validate(&a, &b, &wide_bias, &TensorInfo::default(), 1.0),
            Err(TensorError::ShapeMismatch { .. })
        ));
        let bad_b = TensorInfo::new(Shape::d2(4, 5), DType::F32);
        assert!(GemmWithBias::validate(&a, &bad_b, &bias, &TensorInfo::default(), 1.0).is_err());
    }

    #[test]
    fn test_run() {
        let scheduler = Scheduler::from_config(&RuntimeConfig::default()).unwrap();
        let queue = scheduler.queue().clone();

        let mut a = scheduler.new_tensor(TensorInfo::new(Shape::d2(2, 2), DType::F32));
        let mut b = scheduler.new_tensor(TensorInfo::new(Shape::d2(2, 2), DType::F32));
        let mut bias = scheduler.new_tensor(TensorInfo::new(Shape::d2(2, 1), DType::F32));
        let mut dst = ClTensor::empty(scheduler.context());
        let mut f = GemmWithBias::configure(&scheduler, a.info(), b.info(), bias.info(), dst.info_mut(), 1.0).unwrap();
        assert_eq!(dst.info().shape(), &Shape::d2(2, 2));
        assert_eq!(f.memory_group().blob_sizes().len(), 1);

        for t in [&mut a, &mut b, &mut bias, &mut dst] {
            t.allocate().unwrap();
        }
        // a = [[1, 2], [3, 4]], b = identity, bias = [10, 20] per column
        a.copy_from_f32(&queue, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        b.copy_from_f32(&queue, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        bias.copy_from_f32(&queue, &[10.0, 20.0]).unwrap();

        let pack = TensorPack::new()
            .with(TensorSlot::Src0, &a)
            .with(TensorSlot::Src1, &b)
            .with(TensorSlot::Src2, &bias)
            .with(TensorSlot::Dst, &dst);
        f.run(&pack, &scheduler).unwrap();
        assert!(!f.memory_group().is_acquired());
        assert_eq!(dst.to_f32_vec(&queue).unwrap(), vec![11.0, 22.0, 13.0, 24.0]);

        // the pooled product memory is reused on the next run
        let pack = TensorPack::new()
            .with(TensorSlot::Src0, &a)
            .with(TensorSlot::Src1, &b)
            .with(TensorSlot::Src2, &bias)
            .with(TensorSlot::Dst, &dst);
        f.run(&pack, &scheduler).unwrap();
        assert_eq!(scheduler.pool().stats().new_blobs, 1);
    }

    #[test]
    fn test_run_requires_all_slots() {
        let scheduler = Scheduler::from_config(&RuntimeConfig::default()).unwrap();
        let info = TensorInfo::new(Shape::d2(2, 2), DType::F32);
        let bias = TensorInfo::new(Shape::d2(2, 1), DType::F32);
        let mut dst = TensorInfo::default();
        let mut f = GemmWithBias::configure(&scheduler, &info, &info, &bias, &mut dst, 1.0).unwrap();
        let err = f.run(&TensorPack::new(), &scheduler).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::MissingTensor {
                slot: TensorSlot::Src0,
                ..
            }
        ));
    }
}
