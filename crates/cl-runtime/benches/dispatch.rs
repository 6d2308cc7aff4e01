// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for work size selection and kernel dispatch.

use cl_runtime::kernels::{ArithmeticOp, ConvertPolicy, ElementwiseKernel};
use cl_runtime::{select_local_work_size, KernelType, RuntimeConfig, Scheduler, TensorPack, TensorSlot};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use device_context::NdRange;
use tensor_core::{DType, Shape, TensorInfo};

fn bench_lws_selection(c: &mut Criterion) {
    let gws = NdRange::new(224, 224, 32);
    c.bench_function("select_local_work_size_all_types", |b| {
        b.iter(|| {
            for kernel_type in KernelType::ALL {
                black_box(select_local_work_size(kernel_type, black_box(gws)));
            }
        })
    });
}

fn bench_elementwise_dispatch(c: &mut Criterion) {
    let scheduler = Scheduler::from_config(&RuntimeConfig {
        enable_profiling: false,
        ..RuntimeConfig::default()
    })
    .unwrap();
    let info = TensorInfo::new(Shape::d3(64, 64, 8), DType::F32);
    let mut a = scheduler.new_tensor(info.clone());
    let mut b = scheduler.new_tensor(info);
    let mut out = scheduler.new_tensor(TensorInfo::default());
    let add = ElementwiseKernel::configure(
        scheduler.library(),
        ArithmeticOp::Add,
        a.info(),
        b.info(),
        out.info_mut(),
        ConvertPolicy::Saturate,
    )
    .unwrap();
    for t in [&mut a, &mut b, &mut out] {
        t.allocate().unwrap();
    }
    let pack = TensorPack::new()
        .with(TensorSlot::Src0, &a)
        .with(TensorSlot::Src1, &b)
        .with(TensorSlot::Dst, &out);

    c.bench_function("elementwise_add_64x64x8", |bench| {
        bench.iter(|| {
            scheduler.enqueue(&add, &pack, false).unwrap();
            scheduler.sync();
        })
    });
}

criterion_group!(benches, bench_lws_selection, bench_elementwise_dispatch);
criterion_main!(benches);
