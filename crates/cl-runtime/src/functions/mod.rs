// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Composite functions.
//!
//! A function chains one or more kernels and owns whatever auxiliary
//! memory they share. Like kernels, functions validate once in
//! `configure()`; [`ClFunction::run`] only schedules work.

mod depthwise;
mod gemm_bias;
mod min_max_location;

pub use depthwise::DepthwiseConvolution3x3;
pub use gemm_bias::GemmWithBias;
pub use min_max_location::MinMaxLocation;

use crate::{RuntimeError, Scheduler, TensorPack};

/// A configured operator made of one or more kernels.
pub trait ClFunction {
    /// One-off work before the first run, such as reshaping constant
    /// inputs. Runs at most once.
    fn prepare(&mut self, _scheduler: &Scheduler) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Schedules every kernel of the function on the scheduler's queue.
    fn run(&mut self, pack: &TensorPack<'_>, scheduler: &Scheduler) -> Result<(), RuntimeError>;
}
