// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Quantization parameters.
//!
//! A quantized value `q` maps to the real value `(q - offset) * scale`.
//! A single `(scale, offset)` pair applies to the whole tensor; per-channel
//! formats carry one scale (and optionally one offset) per channel.

/// The uniform `(scale, offset)` pair of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UniformQuantizationInfo {
    pub scale: f32,
    pub offset: i32,
}

impl Default for UniformQuantizationInfo {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0,
        }
    }
}

/// Quantization parameters attached to a [`crate::TensorInfo`].
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct QuantizationInfo {
    scale: Vec<f32>,
    offset: Vec<i32>,
}

impl QuantizationInfo {
    /// Uniform quantization with the given scale and offset.
    pub fn new(scale: f32, offset: i32) -> Self {
        Self {
            scale: vec![scale],
            offset: vec![offset],
        }
    }

    /// Per-channel symmetric quantization (no offsets).
    pub fn per_channel(scales: Vec<f32>) -> Self {
        Self {
            scale: scales,
            offset: Vec::new(),
        }
    }

    /// Per-channel quantization with explicit offsets.
    ///
    /// # Panics
    /// Panics if the two vectors have different lengths.
    pub fn per_channel_with_offsets(scales: Vec<f32>, offsets: Vec<i32>) -> Self {
        assert_eq!(
            scales.len(),
            offsets.len(),
            "per-channel scales and offsets must have the same length"
        );
        Self {
            scale: scales,
            offset: offsets,
        }
    }

    /// All scales.
    pub fn scales(&self) -> &[f32] {
        &self.scale
    }

    /// All offsets (may be empty for symmetric formats).
    pub fn offsets(&self) -> &[i32] {
        &self.offset
    }

    /// Returns `true` when no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.scale.is_empty() && self.offset.is_empty()
    }

    /// The uniform view: the first scale/offset, or the identity mapping.
    pub fn uniform(&self) -> UniformQuantizationInfo {
        UniformQuantizationInfo {
            scale: self.scale.first().copied().unwrap_or(1.0),
            offset: self.offset.first().copied().unwrap_or(0),
        }
    }
}

impl UniformQuantizationInfo {
    /// Quantizes to the unsigned asymmetric 8-bit range, rounding to nearest.
    pub fn quantize_u8(&self, value: f32) -> u8 {
        let q = (value / self.scale).round() as i32 + self.offset;
        q.clamp(0, 255) as u8
    }

    /// Quantizes to the signed asymmetric 8-bit range, rounding to nearest.
    pub fn quantize_s8(&self, value: f32) -> i8 {
        let q = (value / self.scale).round() as i32 + self.offset;
        q.clamp(-128, 127) as i8
    }

    /// Dequantizes an unsigned 8-bit value.
    pub fn dequantize_u8(&self, value: u8) -> f32 {
        (value as i32 - self.offset) as f32 * self.scale
    }

    /// Dequantizes a signed 8-bit value.
    pub fn dequantize_s8(&self, value: i8) -> f32 {
        (value as i32 - self.offset) as f32 * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_roundtrip() {
        let q = QuantizationInfo::new(0.5, 10);
        let uq = q.uniform();
        assert_eq!(uq.quantize_u8(2.0), 14);
        assert_eq!(uq.dequantize_u8(14), 2.0);
    }

    #[test]
    fn test_quantize_saturates() {
        let uq = UniformQuantizationInfo {
            scale: 0.1,
            offset: 0,
        };
        assert_eq!(uq.quantize_u8(1000.0), 255);
        assert_eq!(uq.quantize_u8(-5.0), 0);
        assert_eq!(uq.quantize_s8(-1000.0), -128);
    }

    #[test]
    fn test_per_channel() {
        let q = QuantizationInfo::per_channel(vec![0.1, 0.2, 0.3]);
        assert_eq!(q.scales().len(), 3);
        assert!(q.offsets().is_empty());
        assert_eq!(q.uniform().scale, 0.1);
        assert_eq!(q.uniform().offset, 0);
    }

    #[test]
    fn test_empty_defaults_to_identity() {
        let q = QuantizationInfo::default();
        assert!(q.is_empty());
        assert_eq!(q.uniform(), UniformQuantizationInfo::default());
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn test_mismatched_lengths() {
        let _ = QuantizationInfo::per_channel_with_offsets(vec![0.1, 0.2], vec![1]);
    }
}
