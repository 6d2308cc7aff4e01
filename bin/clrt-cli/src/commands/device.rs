// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `clrt device` command: describe the configured device.

use cl_runtime::{KernelLibrary, RuntimeConfig, DEFAULT_LWS};

pub fn execute(config: &RuntimeConfig) -> anyhow::Result<()> {
    super::banner("clrt · Device");

    let options = config.device_options();
    println!("  {}", options.summary());
    println!();

    // ── Target ─────────────────────────────────────────────────
    println!("  Target");
    println!("   GPU target:      {:?}", options.gpu_target);
    println!("   Architecture:    {:?}", options.gpu_arch());
    println!("   OpenCL version:  {}", options.cl_version());
    match options.ddk_version {
        Some(ddk) => println!("   DDK release:     r{ddk}"),
        None => println!("   DDK release:     unknown"),
    }
    println!();

    // ── Capabilities ───────────────────────────────────────────
    println!("  Capabilities");
    println!("   fp16:            {}", yes_no(options.fp16_support()));
    println!("   dot8:            {}", yes_no(options.dot8_support()));
    println!("   non-uniform WG:  {}", yes_no(options.non_uniform_workgroup_support()));
    println!("   image2d buffers: {}", yes_no(options.image2d_from_buffer_support()));
    println!("   dummy items:     {}", yes_no(options.preferred_dummy_work_items_support()));
    println!("   max WG size:     {}", options.max_work_group_size);
    println!();

    // ── Build Options ──────────────────────────────────────────
    let library = KernelLibrary::new(options).with_lws_heuristics(config.use_lws_heuristics);
    println!("  Kernel library");
    println!("   build options:   {}", library.device_build_options()?);
    println!("   default LWS:     {:?} (fallback {:?})", library.default_ndrange(), DEFAULT_LWS);
    println!(
        "   LWS heuristics:  {}",
        if library.use_lws_heuristics() { "on" } else { "off" }
    );
    println!();
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
