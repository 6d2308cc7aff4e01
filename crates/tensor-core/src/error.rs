// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Validation errors for tensor metadata and kernel configuration.

use crate::{BorderSize, DType, Shape};

/// Outcome of a side-effect-free `validate()` call.
///
/// `Ok(())` means the configuration is supported; an error describes the
/// first rule that was violated.
pub type Status = Result<(), TensorError>;

/// Reasons a tensor configuration can be rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// The provided host buffer does not match the expected size.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype} for operation {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    /// Two tensors that must share a data type do not.
    #[error("mismatching dtypes for {op}: {lhs} vs {rhs}")]
    MismatchingDTypes {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },

    /// Quantization parameters are missing or inconsistent.
    #[error("invalid quantization for {op}: {detail}")]
    Quantization { op: &'static str, detail: String },

    /// A tensor does not carry the padding a kernel's border requires.
    #[error("insufficient padding for {op}: need {required:?}, have {available:?}")]
    InsufficientPadding {
        op: &'static str,
        required: BorderSize,
        available: BorderSize,
    },

    /// A window is empty, misaligned with its step, or outside the tensor.
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    /// A sub-tensor region does not fit inside its parent.
    #[error("sub-tensor {shape} at {coords:?} exceeds parent {parent}")]
    SubTensorOutOfBounds {
        shape: Shape,
        coords: Vec<usize>,
        parent: Shape,
    },

    /// Imported memory is smaller than the tensor's total size.
    #[error("imported buffer too small: need {required} bytes, got {actual}")]
    InsufficientMemory { required: usize, actual: usize },

    /// External memory cannot be imported into a pool-managed tensor.
    #[error("cannot import memory into a tensor managed by a memory group")]
    ManagedImport,

    /// A tensor's metadata has not been initialised yet.
    #[error("tensor info for {op} is not initialised")]
    Uninitialised { op: &'static str },

    /// Any other unsupported parameter combination.
    #[error("unsupported configuration for {op}: {detail}")]
    Unsupported { op: &'static str, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = TensorError::ShapeMismatch {
            op: "add",
            lhs: Shape::d2(2, 3),
            rhs: Shape::d2(4, 3),
        };
        assert_eq!(e.to_string(), "incompatible shapes for add: [2, 3] vs [4, 3]");

        let e = TensorError::InsufficientMemory {
            required: 64,
            actual: 32,
        };
        assert!(e.to_string().contains("need 64 bytes"));
    }

    #[test]
    fn test_status_alias() {
        let ok: Status = Ok(());
        assert!(ok.is_ok());
        let err: Status = Err(TensorError::ManagedImport);
        assert!(err.is_err());
    }
}
