// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Blob pool statistics.

/// Cumulative counters describing how a [`crate::BlobPool`] has been used.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct AllocationStats {
    /// Blob requests, successful or not.
    pub total_requests: u64,
    /// Requests served by recycling a returned blob.
    pub reused_blobs: u64,
    /// Requests that created a new device buffer.
    pub new_blobs: u64,
    /// Requests refused because of the budget or the device capacity.
    pub oom_count: u64,
    /// Blobs handed back to the pool.
    pub returned_blobs: u64,
    /// High-water mark of live pooled bytes.
    pub peak_allocated_bytes: usize,
    /// Sum of all requested sizes.
    pub cumulative_requested_bytes: u64,
}

impl AllocationStats {
    /// Fraction of successful requests served from the free list.
    pub fn reuse_ratio(&self) -> f64 {
        let served = self.reused_blobs + self.new_blobs;
        if served == 0 {
            return 0.0;
        }
        self.reused_blobs as f64 / served as f64
    }

    pub(crate) fn record_reuse(&mut self, size: usize) {
        self.total_requests += 1;
        self.reused_blobs += 1;
        self.cumulative_requested_bytes += size as u64;
    }

    pub(crate) fn record_new(&mut self, size: usize) {
        self.total_requests += 1;
        self.new_blobs += 1;
        self.cumulative_requested_bytes += size as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.total_requests += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_return(&mut self) {
        self.returned_blobs += 1;
    }

    pub(crate) fn update_peak(&mut self, live_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(live_bytes);
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "Blobs: {} requests ({} reused, {} new, {:.0}% reuse), {} OOMs, peak {:.2} MB, {} returned",
            self.total_requests,
            self.reused_blobs,
            self.new_blobs,
            self.reuse_ratio() * 100.0,
            self.oom_count,
            self.peak_allocated_bytes as f64 / (1024.0 * 1024.0),
            self.returned_blobs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_ratio() {
        let mut s = AllocationStats::default();
        assert_eq!(s.reuse_ratio(), 0.0);
        s.record_new(100);
        s.record_reuse(100);
        s.record_reuse(50);
        s.record_oom();
        assert!((s.reuse_ratio() - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(s.total_requests, 4);
        assert_eq!(s.cumulative_requested_bytes, 250);
    }

    #[test]
    fn test_peak_never_decreases() {
        let mut s = AllocationStats::default();
        s.update_peak(300);
        s.update_peak(100);
        assert_eq!(s.peak_allocated_bytes, 300);
    }

    #[test]
    fn test_summary() {
        let mut s = AllocationStats::default();
        s.record_new(1024);
        s.record_return();
        let summary = s.summary();
        assert!(summary.contains("1 requests"));
        assert!(summary.contains("1 new"));
        assert!(summary.contains("1 returned"));
    }
}
