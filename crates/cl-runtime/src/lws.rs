// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Local work size heuristics.
//!
//! A pure table from kernel category and global work size to the local
//! work size a dispatch should use when no tuned value is available.
//! Categories without a dedicated rule fall back to the device default
//! range reported by the kernel library.
//!
//! | category    | condition          | local size            |
//! |-------------|--------------------|-----------------------|
//! | `Gemm`      | `z != 1`           | `(4, 4, 2)`           |
//! | `Gemm`      | `x > 256`          | `(2, 16, 1)`          |
//! | `Gemm`      | otherwise          | `(32, 4, 1)`          |
//! | `Winograd`  | always             | `(4, 2, 1)`           |
//! | `Direct`    | `x < y`, `x < 4`   | `(min(x, 2), 32, 1)`  |
//! | `Direct`    | `x < y`            | `(min(x, 4), 8, 1)`   |
//! | `Direct`    | otherwise          | `(8, 4, 1)`           |
//! | `Depthwise` | `x < 32`           | `(x, 4, 4)`           |
//! | `Depthwise` | otherwise          | `(8, 4, 2)`           |
//! | others      |                    | default range         |

use device_context::NdRange;

use crate::KernelType;

/// Library-wide fallback when the device limit is unknown.
pub const DEFAULT_LWS: NdRange = NdRange::new(128, 1, 1);

/// Local work size for a kernel of `kernel_type` over `gws`, falling back
/// to [`DEFAULT_LWS`].
///
/// ```
/// use cl_runtime::{select_local_work_size, KernelType};
/// use device_context::NdRange;
///
/// let lws = select_local_work_size(KernelType::Gemm, NdRange::new(300, 10, 1));
/// assert_eq!(lws, NdRange::new(2, 16, 1));
/// ```
pub fn select_local_work_size(kernel_type: KernelType, gws: NdRange) -> NdRange {
    select_local_work_size_with_default(kernel_type, gws, DEFAULT_LWS)
}

/// Like [`select_local_work_size`], with the device-derived default range.
pub fn select_local_work_size_with_default(
    kernel_type: KernelType,
    gws: NdRange,
    default: NdRange,
) -> NdRange {
    match kernel_type {
        KernelType::Gemm => gemm_lws(gws),
        KernelType::Winograd => NdRange::new(4, 2, 1),
        KernelType::Direct => direct_lws(gws),
        KernelType::Depthwise => depthwise_lws(gws),
        KernelType::Unknown | KernelType::Elementwise | KernelType::Pool => default,
    }
}

fn gemm_lws(gws: NdRange) -> NdRange {
    if gws.z() != 1 {
        NdRange::new(4, 4, 2)
    } else if gws.x() > 256 {
        NdRange::new(2, 16, 1)
    } else {
        NdRange::new(32, 4, 1)
    }
}

fn direct_lws(gws: NdRange) -> NdRange {
    let (x, y) = (gws.x(), gws.y());
    if x < y {
        if x < 4 {
            NdRange::new(x.min(2), 32, 1)
        } else {
            NdRange::new(x.min(4), 8, 1)
        }
    } else {
        NdRange::new(8, 4, 1)
    }
}

fn depthwise_lws(gws: NdRange) -> NdRange {
    if gws.x() < 32 {
        NdRange::new(gws.x(), 4, 4)
    } else {
        NdRange::new(8, 4, 2)
    }
}
