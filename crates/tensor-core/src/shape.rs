// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptors and dimension utilities.
//!
//! Dimensions are stored innermost first: `dims[0]` is the width (x),
//! `dims[1]` the height (y), `dims[2]` the channels/depth (z) and anything
//! beyond is a batch dimension. This matches the order in which kernels
//! build their global work size.

use std::fmt;

/// Maximum number of dimensions a shape (and a [`crate::Window`]) can have.
pub const MAX_DIMS: usize = 6;

/// Describes the dimensionality of a tensor.
///
/// Querying a dimension beyond the rank returns 1, so a 2-D shape behaves as
/// a 6-D shape padded with unit dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a new shape from the given dimensions (x first).
    ///
    /// # Panics
    /// Panics if more than [`MAX_DIMS`] dimensions are given.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![4, 3, 2]);
    /// assert_eq!(s.rank(), 3);
    /// assert_eq!(s.num_elements(), 24);
    /// assert_eq!(s.dim(5), 1);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        assert!(
            dims.len() <= MAX_DIMS,
            "shape has {} dimensions, at most {MAX_DIMS} are supported",
            dims.len()
        );
        Self { dims }
    }

    /// Creates a scalar shape (rank 0).
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    /// Creates a 1-D shape.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Creates a 2-D shape of `width` columns and `height` rows.
    pub fn d2(width: usize, height: usize) -> Self {
        Self {
            dims: vec![width, height],
        }
    }

    /// Creates a 3-D shape (`width`, `height`, `depth`).
    pub fn d3(width: usize, height: usize, depth: usize) -> Self {
        Self {
            dims: vec![width, height, depth],
        }
    }

    /// Creates a 4-D shape (`width`, `height`, `depth`, `batches`).
    pub fn d4(width: usize, height: usize, depth: usize, batches: usize) -> Self {
        Self {
            dims: vec![width, height, depth, batches],
        }
    }

    /// Returns the number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    ///
    /// For a scalar shape (rank 0), returns 1.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the size of dimension `index`, or 1 beyond the rank.
    pub fn dim(&self, index: usize) -> usize {
        self.dims.get(index).copied().unwrap_or(1)
    }

    /// Returns the product of all dimensions starting at `from`.
    pub fn collapsed_from(&self, from: usize) -> usize {
        self.dims.iter().skip(from).product()
    }

    /// Computes the memory footprint in bytes for a given [`crate::DType`],
    /// ignoring any padding.
    pub fn size_bytes(&self, dtype: super::DType) -> usize {
        self.num_elements() * dtype.size_bytes()
    }

    /// Computes dense element strides (x fastest).
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = Vec::with_capacity(self.dims.len());
        let mut acc = 1;
        for &d in &self.dims {
            strides.push(acc);
            acc *= d;
        }
        strides
    }

    /// Returns `true` if two shapes are broadcast-compatible.
    ///
    /// Dimensions are compared index by index; each pair must be equal or
    /// contain a 1.
    pub fn is_broadcast_compatible(&self, other: &Shape) -> bool {
        (0..self.rank().max(other.rank())).all(|i| {
            let (a, b) = (self.dim(i), other.dim(i));
            a == b || a == 1 || b == 1
        })
    }

    /// Computes the shape resulting from broadcasting `shapes` together.
    ///
    /// Returns `None` if any pair is incompatible.
    pub fn broadcast(shapes: &[&Shape]) -> Option<Shape> {
        let rank = shapes.iter().map(|s| s.rank()).max().unwrap_or(0);
        let mut dims = vec![1usize; rank];
        for shape in shapes {
            for (i, out) in dims.iter_mut().enumerate() {
                let d = shape.dim(i);
                if *out == 1 {
                    *out = d;
                } else if d != 1 && d != *out {
                    return None;
                }
            }
        }
        Some(Shape { dims })
    }

    /// Returns `true` if `self` (`[K, M]`) can be multiplied by `other`
    /// (`[N, K]`): the width of the left operand equals the height of the
    /// right one.
    pub fn is_matmul_compatible(&self, other: &Shape) -> bool {
        if self.rank() < 2 || other.rank() < 2 {
            return false;
        }
        self.dims[0] == other.dims[1]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// Convenience: `Shape::from(vec![2, 3])`.
impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

/// Convenience: `Shape::from(&[2, 3][..])`.
impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
        assert!(s.strides().is_empty());
    }

    #[test]
    fn test_dim_beyond_rank_is_one() {
        let s = Shape::d2(3, 4);
        assert_eq!(s.dim(0), 3);
        assert_eq!(s.dim(1), 4);
        assert_eq!(s.dim(2), 1);
        assert_eq!(s.dim(MAX_DIMS - 1), 1);
    }

    #[test]
    fn test_strides_x_first() {
        let s = Shape::d3(4, 3, 2);
        assert_eq!(s.strides(), vec![1, 4, 12]);
        assert_eq!(s.collapsed_from(1), 6);
    }

    #[test]
    fn test_broadcast_compatible() {
        let a = Shape::d2(3, 1);
        let b = Shape::d2(3, 4);
        assert!(a.is_broadcast_compatible(&b));

        let c = Shape::d2(2, 4);
        assert!(!a.is_broadcast_compatible(&c));
    }

    #[test]
    fn test_broadcast_shape() {
        let a = Shape::d3(8, 1, 3);
        let b = Shape::d2(8, 5);
        assert_eq!(Shape::broadcast(&[&a, &b]), Some(Shape::d3(8, 5, 3)));
        assert_eq!(Shape::broadcast(&[&a, &Shape::d2(7, 5)]), None);
    }

    #[test]
    fn test_matmul_compatible() {
        // lhs is 4 columns wide, rhs is 4 rows tall.
        let a = Shape::d2(4, 3);
        let b = Shape::d2(5, 4);
        assert!(a.is_matmul_compatible(&b));
        assert!(!a.is_matmul_compatible(&Shape::d2(5, 5)));
    }

    #[test]
    fn test_display() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(format!("{s}"), "[2, 3, 4]");
    }

    #[test]
    fn test_size_bytes() {
        let s = Shape::d2(10, 20);
        assert_eq!(s.size_bytes(DType::F32), 800);
        assert_eq!(s.size_bytes(DType::F16), 400);
        assert_eq!(s.size_bytes(DType::QAsymm8), 200);
    }

    #[test]
    #[should_panic(expected = "at most 6 are supported")]
    fn test_too_many_dims() {
        let _ = Shape::new(vec![1; 7]);
    }
}
