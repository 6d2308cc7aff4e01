// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side element access.
//!
//! Shared by the tensor transfer helpers and the reference kernel bodies:
//! converts between stored elements and `f32`, and walks the coordinates
//! of a shape or window in x-fastest order. Offsets follow the strides of
//! the [`TensorInfo`], so padding and sub-tensor offsets are honoured.

use tensor_core::{DType, Shape, TensorInfo, UniformQuantizationInfo, Window, MAX_DIMS};

/// Element coordinates, x first.
pub(crate) type Coords = [usize; MAX_DIMS];

/// Byte offset of the element at `coords` within the tensor's buffer.
pub(crate) fn offset_of(info: &TensorInfo, coords: &Coords) -> usize {
    let strides = info.strides_in_bytes();
    info.offset_first_element_in_bytes()
        + coords
            .iter()
            .zip(strides.iter())
            .map(|(c, s)| c * s)
            .sum::<usize>()
}

/// Byte offset of a possibly negative coordinate (reading into padding).
pub(crate) fn offset_of_signed(info: &TensorInfo, coords: &[isize; MAX_DIMS]) -> usize {
    info.offset_element_in_bytes(coords)
}

/// Converts elements of one data type to and from `f32`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElementCodec {
    dtype: DType,
    quant: UniformQuantizationInfo,
    size: usize,
}

impl ElementCodec {
    pub(crate) fn new(info: &TensorInfo) -> Self {
        Self {
            dtype: info.dtype(),
            quant: info.quantization_info().uniform(),
            size: info.element_size(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Reads the element stored at the start of `bytes`.
    pub(crate) fn decode(&self, bytes: &[u8]) -> f32 {
        let q = self.quant;
        match self.dtype {
            DType::U8 => bytes[0] as f32,
            DType::S8 => bytes[0] as i8 as f32,
            DType::QAsymm8 => q.dequantize_u8(bytes[0]),
            DType::QAsymm8Signed | DType::QSymm8 | DType::QSymm8PerChannel => {
                q.dequantize_s8(bytes[0] as i8)
            }
            DType::QSymm16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 * q.scale,
            DType::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            DType::F16 => half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            DType::BF16 => half::bf16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            DType::S32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            DType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Stores `value` at the start of `out`, rounding and saturating to the
    /// range of integer types.
    pub(crate) fn encode(&self, value: f32, out: &mut [u8]) {
        let q = self.quant;
        match self.dtype {
            DType::U8 => out[0] = value.round().clamp(0.0, 255.0) as u8,
            DType::S8 => out[0] = value.round().clamp(-128.0, 127.0) as i8 as u8,
            DType::QAsymm8 => out[0] = q.quantize_u8(value),
            DType::QAsymm8Signed | DType::QSymm8 | DType::QSymm8PerChannel => {
                out[0] = q.quantize_s8(value) as u8
            }
            DType::QSymm16 => {
                let v = (value / q.scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                out[..2].copy_from_slice(&v.to_le_bytes());
            }
            DType::S16 => {
                let v = value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                out[..2].copy_from_slice(&v.to_le_bytes());
            }
            DType::F16 => out[..2].copy_from_slice(&half::f16::from_f32(value).to_le_bytes()),
            DType::BF16 => out[..2].copy_from_slice(&half::bf16::from_f32(value).to_le_bytes()),
            DType::S32 => {
                let v = value.round().clamp(i32::MIN as f32, i32::MAX as f32) as i32;
                out[..4].copy_from_slice(&v.to_le_bytes());
            }
            DType::F32 => out[..4].copy_from_slice(&value.to_le_bytes()),
        }
    }

    /// Reads the element at `offset`.
    pub(crate) fn load(&self, bytes: &[u8], offset: usize) -> f32 {
        self.decode(&bytes[offset..offset + self.size])
    }

    /// Writes the element at `offset`.
    pub(crate) fn store(&self, bytes: &mut [u8], offset: usize, value: f32) {
        self.encode(value, &mut bytes[offset..offset + self.size]);
    }
}

/// Iterates coordinates in `[start, end)` per dimension, x fastest.
pub(crate) struct CoordIter {
    start: Coords,
    end: Coords,
    next: Option<Coords>,
}

impl CoordIter {
    pub(crate) fn new(start: Coords, end: Coords) -> Self {
        let empty = start.iter().zip(end.iter()).any(|(s, e)| s >= e);
        Self {
            start,
            end,
            next: (!empty).then_some(start),
        }
    }

    /// Every element of `shape`.
    pub(crate) fn shape(shape: &Shape) -> Self {
        let mut end = [1; MAX_DIMS];
        for (i, e) in end.iter_mut().enumerate() {
            *e = shape.dim(i);
        }
        Self::new([0; MAX_DIMS], end)
    }

    /// The elements of `shape` covered by `window`. Window ends rounded up
    /// past the shape are clipped.
    pub(crate) fn window(window: &Window, shape: &Shape) -> Self {
        let mut start = [0; MAX_DIMS];
        let mut end = [1; MAX_DIMS];
        for i in 0..MAX_DIMS {
            let d = window.dim(i);
            start[i] = d.start();
            end[i] = d.end().min(shape.dim(i));
        }
        Self::new(start, end)
    }
}

impl Iterator for CoordIter {
    type Item = Coords;

    fn next(&mut self) -> Option<Coords> {
        let current = self.next?;
        let mut following = current;
        let mut advanced = false;
        for i in 0..MAX_DIMS {
            following[i] += 1;
            if following[i] < self.end[i] {
                advanced = true;
                break;
            }
            following[i] = self.start[i];
        }
        self.next = advanced.then_some(following);
        Some(current)
    }
}

/// Reads every element of the tensor, x fastest, as `f32`.
pub(crate) fn read_dense(info: &TensorInfo, bytes: &[u8]) -> Vec<f32> {
    let codec = ElementCodec::new(info);
    CoordIter::shape(info.shape())
        .map(|c| codec.load(bytes, offset_of(info, &c)))
        .collect()
}

/// Writes `values` (x fastest) into the tensor, leaving padding untouched.
pub(crate) fn write_dense(info: &TensorInfo, bytes: &mut [u8], values: &[f32]) {
    let codec = ElementCodec::new(info);
    for (c, &v) in CoordIter::shape(info.shape()).zip(values) {
        codec.store(bytes, offset_of(info, &c), v);
    }
}
