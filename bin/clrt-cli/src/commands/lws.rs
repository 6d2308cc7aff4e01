// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `clrt lws` command: local work size for a kernel category.

use anyhow::{anyhow, bail};
use cl_runtime::{select_local_work_size_with_default, KernelLibrary, KernelType, RuntimeConfig};
use device_context::NdRange;

pub fn execute(config: &RuntimeConfig, kernel_type: &str, gws: &[usize]) -> anyhow::Result<()> {
    let kernel_type = KernelType::from_name(kernel_type).ok_or_else(|| {
        let known: Vec<_> = KernelType::ALL.iter().map(|t| t.as_str()).collect();
        anyhow!("unknown kernel type '{kernel_type}', expected one of: {}", known.join(", "))
    })?;
    let gws = to_ndrange(gws)?;

    let library = KernelLibrary::new(config.device_options());
    let lws = select_local_work_size_with_default(kernel_type, gws, library.default_ndrange());
    tracing::debug!(%kernel_type, ?gws, ?lws, "selected local work size");

    println!("  kernel type:  {kernel_type}");
    println!("  global size:  {} x {} x {}", gws.x(), gws.y(), gws.z());
    println!("  local size:   {} x {} x {}", lws.x(), lws.y(), lws.z());
    Ok(())
}

fn to_ndrange(gws: &[usize]) -> anyhow::Result<NdRange> {
    if gws.iter().any(|&d| d == 0) {
        bail!("global work size dimensions must be non-zero");
    }
    let dim = |i: usize| gws.get(i).copied().unwrap_or(1);
    Ok(NdRange::new(dim(0), dim(1), dim(2)))
}
