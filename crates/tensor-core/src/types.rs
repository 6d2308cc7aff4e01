// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Small value types shared by tensor metadata and kernels.

use crate::MAX_DIMS;

/// Byte strides, one per dimension.
pub type Strides = [usize; MAX_DIMS];

/// Memory layout of a 4-D activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum DataLayout {
    /// Width fastest, then height, then channels.
    #[default]
    Nchw,
    /// Channels fastest, then width, then height.
    Nhwc,
}

/// Number of elements around the valid region on each side.
///
/// Used both for the halo a filter kernel reads (its *border*) and for the
/// padding a tensor carries around its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct BorderSize {
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
    pub left: usize,
}

/// Padding is described with the same four sides as a border.
pub type PaddingSize = BorderSize;

impl BorderSize {
    /// A border with all four sides set to `size`.
    pub const fn uniform(size: usize) -> Self {
        Self {
            top: size,
            right: size,
            bottom: size,
            left: size,
        }
    }

    /// A border with explicit sides.
    pub const fn new(top: usize, right: usize, bottom: usize, left: usize) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// An empty border.
    pub const fn empty() -> Self {
        Self::uniform(0)
    }

    /// Returns `true` when every side is zero.
    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.right == 0 && self.bottom == 0 && self.left == 0
    }

    /// Returns `true` when every side of `self` is at least as large as the
    /// corresponding side of `other`.
    pub fn covers(&self, other: &BorderSize) -> bool {
        self.top >= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
            && self.left >= other.left
    }

    /// Side-wise maximum of two borders.
    pub fn max(&self, other: &BorderSize) -> BorderSize {
        BorderSize {
            top: self.top.max(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
            left: self.left.max(other.left),
        }
    }
}
