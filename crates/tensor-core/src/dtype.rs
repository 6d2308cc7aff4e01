// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

/// Enumerates the element types a tensor can hold.
///
/// The runtime uses `DType` to compute strides and buffer sizes, to decide
/// which build options a kernel is compiled with, and to reject unsupported
/// combinations in `validate()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DType {
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit signed integer.
    S8,
    /// 8-bit asymmetric quantized, unsigned (uniform scale/offset).
    QAsymm8,
    /// 8-bit asymmetric quantized, signed (uniform scale/offset).
    QAsymm8Signed,
    /// 8-bit symmetric quantized (uniform scale, zero offset).
    QSymm8,
    /// 8-bit symmetric quantized with one scale per output channel.
    QSymm8PerChannel,
    /// 16-bit symmetric quantized.
    QSymm16,
    /// 16-bit signed integer.
    S16,
    /// 32-bit signed integer.
    S32,
    /// 16-bit IEEE 754 floating point.
    F16,
    /// 16-bit brain floating point.
    BF16,
    /// 32-bit IEEE 754 floating point.
    F32,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::U8
            | DType::S8
            | DType::QAsymm8
            | DType::QAsymm8Signed
            | DType::QSymm8
            | DType::QSymm8PerChannel => 1,
            DType::QSymm16 | DType::S16 | DType::F16 | DType::BF16 => 2,
            DType::S32 | DType::F32 => 4,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::S8 => "s8",
            DType::QAsymm8 => "qasymm8",
            DType::QAsymm8Signed => "qasymm8_signed",
            DType::QSymm8 => "qsymm8",
            DType::QSymm8PerChannel => "qsymm8_per_channel",
            DType::QSymm16 => "qsymm16",
            DType::S16 => "s16",
            DType::S32 => "s32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
        }
    }

    /// The OpenCL C type name used in `-DDATA_TYPE=` build options.
    pub fn cl_type_name(self) -> &'static str {
        match self {
            DType::U8 | DType::QAsymm8 => "uchar",
            DType::S8 | DType::QAsymm8Signed | DType::QSymm8 | DType::QSymm8PerChannel => "char",
            DType::QSymm16 | DType::S16 => "short",
            DType::S32 => "int",
            DType::F16 => "half",
            DType::BF16 => "ushort",
            DType::F32 => "float",
        }
    }

    /// Returns `true` for any quantized format.
    pub fn is_quantized(self) -> bool {
        matches!(
            self,
            DType::QAsymm8
                | DType::QAsymm8Signed
                | DType::QSymm8
                | DType::QSymm8PerChannel
                | DType::QSymm16
        )
    }

    /// Returns `true` for formats carrying a non-zero offset.
    pub fn is_quantized_asymmetric(self) -> bool {
        matches!(self, DType::QAsymm8 | DType::QAsymm8Signed)
    }

    /// Returns `true` for formats that carry one scale per channel.
    pub fn is_quantized_per_channel(self) -> bool {
        matches!(self, DType::QSymm8PerChannel)
    }

    /// Returns `true` for floating-point formats.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
