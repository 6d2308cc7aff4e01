// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dispatch profiling metrics.
//!
//! [`DispatchMetrics`] aggregates the [`DispatchRecord`]s a command queue
//! keeps for executed kernels: per-kernel dispatch counts and timings, and
//! how often the local work size was left to the driver.

use std::time::Duration;

use device_context::DispatchRecord;

/// Aggregate of every dispatch of one kernel.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct KernelMetrics {
    pub kernel_name: String,
    pub dispatches: usize,
    pub total_duration: Duration,
    /// Sum of the global work sizes.
    pub work_items: usize,
    /// Dispatches enqueued without a local work size.
    pub driver_chosen_lws: usize,
}

impl KernelMetrics {
    fn new(kernel_name: &str) -> Self {
        Self {
            kernel_name: kernel_name.to_string(),
            dispatches: 0,
            total_duration: Duration::ZERO,
            work_items: 0,
            driver_chosen_lws: 0,
        }
    }

    pub fn mean_duration(&self) -> Duration {
        if self.dispatches == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.dispatches as u32
    }
}

/// Metrics over a sequence of kernel dispatches.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DispatchMetrics {
    pub total_duration: Duration,
    pub num_dispatches: usize,
    /// Per-kernel aggregates, in order of first dispatch.
    pub kernel_metrics: Vec<KernelMetrics>,
    /// Peak device memory of the context, when known.
    pub peak_device_bytes: usize,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, dispatch: &DispatchRecord) {
        self.total_duration += dispatch.duration;
        self.num_dispatches += 1;

        let idx = match self.kernel_metrics.iter().position(|k| k.kernel_name == dispatch.name) {
            Some(idx) => idx,
            None => {
                self.kernel_metrics.push(KernelMetrics::new(&dispatch.name));
                self.kernel_metrics.len() - 1
            }
        };
        let k = &mut self.kernel_metrics[idx];
        k.dispatches += 1;
        k.total_duration += dispatch.duration;
        k.work_items += dispatch.gws.total();
        if dispatch.lws.is_none() {
            k.driver_chosen_lws += 1;
        }
    }

    pub fn record_all<'a>(&mut self, dispatches: impl IntoIterator<Item = &'a DispatchRecord>) {
        for d in dispatches {
            self.record(d);
        }
    }

    pub fn update_peak_memory(&mut self, bytes: usize) {
        self.peak_device_bytes = self.peak_device_bytes.max(bytes);
    }

    pub fn kernel(&self, name: &str) -> Option<&KernelMetrics> {
        self.kernel_metrics.iter().find(|k| k.kernel_name == name)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_device_bytes as f64 / (1024.0 * 1024.0);
        let driver_lws: usize = self.kernel_metrics.iter().map(|k| k.driver_chosen_lws).sum();
        format!(
            "Dispatch: {} dispatches of {} kernels, {:.3}ms total, \
             {} without lws hint, peak {:.2} MB",
            self.num_dispatches,
            self.kernel_metrics.len(),
            self.total_duration.as_secs_f64() * 1000.0,
            driver_lws,
            peak_mb,
        )
    }
}
