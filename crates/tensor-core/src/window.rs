// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution windows.
//!
//! A [`Window`] describes the iteration space of a kernel as a
//! `(start, end, step)` triple per dimension. Kernels compute their
//! maximum window at configure time; callers may run them over any
//! sub-window of it.

use std::fmt;

use crate::{Shape, TensorError, MAX_DIMS};

/// One dimension of a [`Window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Dimension {
    start: usize,
    end: usize,
    step: usize,
}

impl Default for Dimension {
    fn default() -> Self {
        Self {
            start: 0,
            end: 1,
            step: 1,
        }
    }
}

impl Dimension {
    /// # Panics
    /// Panics if `step` is zero or `end < start`.
    pub fn new(start: usize, end: usize, step: usize) -> Self {
        assert!(step > 0, "window step must be positive");
        assert!(end >= start, "window end {end} is before start {start}");
        Self { start, end, step }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Number of steps needed to cover `[start, end)`.
    pub fn num_iterations(&self) -> usize {
        (self.end - self.start).div_ceil(self.step)
    }
}

/// Iteration space of a kernel across [`MAX_DIMS`] dimensions.
///
/// Unset dimensions default to `(0, 1, 1)`: a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Window {
    dims: [Dimension; MAX_DIMS],
}

impl Window {
    /// Index of the width dimension.
    pub const DIM_X: usize = 0;
    /// Index of the height dimension.
    pub const DIM_Y: usize = 1;
    /// Index of the depth dimension.
    pub const DIM_Z: usize = 2;

    /// Creates a window covering `shape`, processing `steps[i]` elements
    /// per iteration along dimension `i` (missing steps default to 1).
    /// Ends are rounded up to a multiple of the step, so kernels that
    /// process several elements per work item may touch the right padding.
    pub fn from_shape(shape: &Shape, steps: &[usize]) -> Self {
        let mut window = Window::default();
        for (i, d) in window.dims.iter_mut().enumerate() {
            let step = steps.get(i).copied().unwrap_or(1);
            let extent = shape.dim(i);
            *d = Dimension::new(0, extent.div_ceil(step) * step, step);
        }
        window
    }

    pub fn dim(&self, index: usize) -> Dimension {
        self.dims[index]
    }

    pub fn x(&self) -> Dimension {
        self.dims[Self::DIM_X]
    }

    pub fn y(&self) -> Dimension {
        self.dims[Self::DIM_Y]
    }

    pub fn z(&self) -> Dimension {
        self.dims[Self::DIM_Z]
    }

    /// Replaces dimension `index`.
    pub fn set(&mut self, index: usize, dim: Dimension) {
        self.dims[index] = dim;
    }

    /// Changes the step of dimension `index`, keeping its bounds.
    pub fn set_dimension_step(&mut self, index: usize, step: usize) {
        let d = self.dims[index];
        self.dims[index] = Dimension::new(d.start, d.end, step);
    }

    /// Number of iterations along dimension `index`.
    pub fn num_iterations(&self, index: usize) -> usize {
        self.dims[index].num_iterations()
    }

    /// Total number of iterations across all dimensions.
    pub fn num_iterations_total(&self) -> usize {
        self.dims.iter().map(Dimension::num_iterations).product()
    }

    /// Checks that every dimension is non-empty and a whole number of steps.
    pub fn validate(&self) -> Result<(), TensorError> {
        for (i, d) in self.dims.iter().enumerate() {
            if d.end == d.start {
                return Err(TensorError::InvalidWindow(format!("dimension {i} is empty")));
            }
            if (d.end - d.start) % d.step != 0 {
                return Err(TensorError::InvalidWindow(format!(
                    "dimension {i}: extent {} is not a multiple of step {}",
                    d.end - d.start,
                    d.step
                )));
            }
        }
        Ok(())
    }

    /// Returns `true` if every dimension of `self` lies within `other`.
    pub fn is_subwindow_of(&self, other: &Window) -> bool {
        self.dims
            .iter()
            .zip(other.dims.iter())
            .all(|(a, b)| a.start >= b.start && a.end <= b.end)
    }

    /// The first 3-D slice: dimensions 0 to 2 unchanged, every higher
    /// dimension collapsed to a single step at its start.
    pub fn first_slice_window_3d(&self) -> Window {
        let mut slice = *self;
        for d in slice.dims.iter_mut().skip(3) {
            *d = Dimension::new(d.start, d.start + d.step, d.step);
        }
        slice
    }

    /// Advances `slice` to the next 3-D slice of `self`.
    ///
    /// Returns `false` once every slice has been visited.
    pub fn slide_window_slice_3d(&self, slice: &mut Window) -> bool {
        for i in 3..MAX_DIMS {
            let full = self.dims[i];
            let cur = slice.dims[i];
            let next = cur.start + full.step;
            if next < full.end {
                slice.dims[i] = Dimension::new(next, next + full.step, full.step);
                return true;
            }
            slice.dims[i] = Dimension::new(full.start, full.start + full.step, full.step);
        }
        false
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({}, {}, {})", d.start, d.end, d.step)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_is_single_iteration() {
        let w = Window::default();
        assert_eq!(w.num_iterations_total(), 1);
        assert!(w.validate().is_ok());
    }

    #[test]
    fn test_from_shape_rounds_up_to_step() {
        let w = Window::from_shape(&Shape::d2(10, 3), &[4]);
        assert_eq!(w.x(), Dimension::new(0, 12, 4));
        assert_eq!(w.y(), Dimension::new(0, 3, 1));
        assert_eq!(w.num_iterations(Window::DIM_X), 3);
        assert_eq!(w.num_iterations_total(), 9);
    }

    #[test]
    fn test_validate_rejects_empty_dimension() {
        let w = Window::from_shape(&Shape::d2(0, 3), &[]);
        assert!(matches!(w.validate(), Err(TensorError::InvalidWindow(_))));
    }

    #[test]
    fn test_subwindow() {
        let full = Window::from_shape(&Shape::d2(8, 8), &[]);
        let mut part = full;
        part.set(0, Dimension::new(2, 6, 1));
        assert!(part.is_subwindow_of(&full));
        assert!(!full.is_subwindow_of(&part));
    }

    #[test]
    fn test_slide_3d_slices() {
        let w = Window::from_shape(&Shape::new(vec![4, 4, 2, 3, 2]), &[]);
        let mut slice = w.first_slice_window_3d();
        let mut count = 1;
        assert_eq!(slice.dim(3), Dimension::new(0, 1, 1));
        while w.slide_window_slice_3d(&mut slice) {
            count += 1;
        }
        assert_eq!(count, 6);
    }

    #[test]
    fn test_display() {
        let w = Window::from_shape(&Shape::vector(4), &[]);
        assert!(w.to_string().starts_with("{(0, 4, 1), (0, 1, 1)"));
    }
}
