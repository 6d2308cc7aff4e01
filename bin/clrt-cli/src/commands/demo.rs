// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `clrt demo` command: run a small pipeline on the emulated device.
//!
//! ```text
//! GemmWithBias ──► DepthwiseConvolution3x3 ──► MinMaxLocation
//! ```

use cl_runtime::functions::{ClFunction, DepthwiseConvolution3x3, GemmWithBias, MinMaxLocation};
use cl_runtime::kernels::PadStrideInfo;
use cl_runtime::{ClTensor, RuntimeConfig, Scheduler, TensorPack, TensorSlot};
use tensor_core::{DType, Shape, TensorInfo};

pub fn execute(config: &RuntimeConfig, size: usize, json: bool) -> anyhow::Result<()> {
    anyhow::ensure!(size >= 3, "demo size must be at least 3, got {size}");
    if !json {
        super::banner("clrt · Demo");
    }

    let scheduler = Scheduler::new(device_context::ClContext::new(config.device_options()), config)?;
    let queue = scheduler.queue().clone();

    // ── Configure ──────────────────────────────────────────────
    let mut a = scheduler.new_tensor(TensorInfo::new(Shape::d2(size, size), DType::F32));
    let mut b = scheduler.new_tensor(TensorInfo::new(Shape::d2(size, size), DType::F32));
    let mut bias = scheduler.new_tensor(TensorInfo::new(Shape::d2(size, 1), DType::F32));
    let mut product = ClTensor::empty(scheduler.context());
    let mut gemm = GemmWithBias::configure(&scheduler, a.info(), b.info(), bias.info(), product.info_mut(), 1.0)?;

    let mut weights = scheduler.new_tensor(TensorInfo::new(Shape::d3(3, 3, 1), DType::F32));
    let mut conv_out = ClTensor::empty(scheduler.context());
    let mut conv = DepthwiseConvolution3x3::configure(
        &scheduler,
        product.info_mut(),
        weights.info(),
        None,
        conv_out.info_mut(),
        PadStrideInfo::new(1, 1, 1, 1),
        1,
    )?;
    let mut min_max = MinMaxLocation::configure(&scheduler, conv_out.info(), 4)?;

    for t in [&mut a, &mut b, &mut bias, &mut product, &mut weights, &mut conv_out] {
        t.allocate()?;
    }
    tracing::info!(size, "demo pipeline configured");

    // ── Inputs ─────────────────────────────────────────────────
    let ramp: Vec<f32> = (0..size * size).map(|i| (i % 7) as f32 - 3.0).collect();
    a.copy_from_f32(&queue, &ramp)?;
    let identity: Vec<f32> = (0..size * size)
        .map(|i| if i % size == i / size { 1.0 } else { 0.0 })
        .collect();
    b.copy_from_f32(&queue, &identity)?;
    bias.fill_f32(&queue, 0.5)?;
    weights.fill_f32(&queue, 1.0 / 9.0)?;

    // ── Run ────────────────────────────────────────────────────
    let gemm_pack = TensorPack::new()
        .with(TensorSlot::Src0, &a)
        .with(TensorSlot::Src1, &b)
        .with(TensorSlot::Src2, &bias)
        .with(TensorSlot::Dst, &product);
    gemm.run(&gemm_pack, &scheduler)?;

    let conv_pack = TensorPack::new()
        .with(TensorSlot::Src0, &product)
        .with(TensorSlot::Src1, &weights)
        .with(TensorSlot::Dst, &conv_out);
    conv.run(&conv_pack, &scheduler)?;

    let min_max_pack = TensorPack::new().with(TensorSlot::Src0, &conv_out);
    min_max.run(&min_max_pack, &scheduler)?;
    scheduler.sync();

    let metrics = scheduler.metrics();
    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    // ── Results ────────────────────────────────────────────────
    if let Some(result) = min_max.result() {
        println!("  min {:.3} ({} hits)  max {:.3} ({} hits)", result.min, result.min_count, result.max, result.max_count);
        let min_locs: Vec<_> = min_max.min_locations()?.iter().map(|c| (c.x, c.y)).collect();
        let max_locs: Vec<_> = min_max.max_locations()?.iter().map(|c| (c.x, c.y)).collect();
        println!("  min at {min_locs:?}");
        println!("  max at {max_locs:?}");
    }
    println!();
    println!(
        "  {:<36} {:>6} {:>12} {:>10}",
        "Kernel", "Runs", "Mean (us)", "Items"
    );
    println!("  {}", "-".repeat(68));
    for k in &metrics.kernel_metrics {
        println!(
            "  {:<36} {:>6} {:>12.1} {:>10}",
            k.kernel_name,
            k.dispatches,
            k.mean_duration().as_secs_f64() * 1e6,
            k.work_items,
        );
    }
    println!();
    println!("  {}", metrics.summary());
    let stats = scheduler.pool().stats();
    println!("  Pool: {} new blobs, {} reused", stats.new_blobs, stats.reused_blobs);
    Ok(())
}
