// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Minimum, maximum and their locations in a 2-D image.

use tensor_core::{Status, TensorInfo};

use super::ClFunction;
use crate::kernels::{MinMaxLocationKernel, MinMaxResult};
use crate::{ClCoordinates2DArray, Coordinates2D, RuntimeError, Scheduler, TensorPack};

/// Finds the extrema of the image bound to `Src0`.
///
/// The function owns two coordinate arrays of fixed capacity. After each
/// run their length is the number of locations found, capped at the
/// capacity; [`MinMaxLocation::result`] reports the uncapped counts.
pub struct MinMaxLocation {
    kernel: MinMaxLocationKernel,
    min_loc: ClCoordinates2DArray,
    max_loc: ClCoordinates2DArray,
    result: Option<MinMaxResult>,
}

impl MinMaxLocation {
    pub fn validate(src: &TensorInfo) -> Status {
        MinMaxLocationKernel::validate(src)
    }

    /// Configures the function with room for `max_locations` coordinates
    /// of each extremum.
    pub fn configure(scheduler: &Scheduler, src: &TensorInfo, max_locations: usize) -> Result<Self, RuntimeError> {
        Self::validate(src)?;
        let min_loc = ClCoordinates2DArray::new(scheduler.context(), max_locations)?;
        let max_loc = ClCoordinates2DArray::new(scheduler.context(), max_locations)?;
        let kernel =
            MinMaxLocationKernel::configure(scheduler.library(), scheduler.context(), src, Some(&min_loc), Some(&max_loc))?;
        Ok(Self {
            kernel,
            min_loc,
            max_loc,
            result: None,
        })
    }

    /// Values of the last run.
    pub fn result(&self) -> Option<MinMaxResult> {
        self.result
    }

    /// Locations of the minimum found by the last run, x then y order.
    pub fn min_locations(&self) -> Result<Vec<Coordinates2D>, RuntimeError> {
        Ok(self.min_loc.download()?)
    }

    pub fn max_locations(&self) -> Result<Vec<Coordinates2D>, RuntimeError> {
        Ok(self.max_loc.download()?)
    }
}

impl ClFunction for MinMaxLocation {
    /// Runs the kernel and waits for it: the array lengths depend on the
    /// counts it produces.
    fn run(&mut self, pack: &TensorPack<'_>, scheduler: &Scheduler) -> Result<(), RuntimeError> {
        self.kernel.reset(scheduler.queue());
        scheduler.enqueue(&self.kernel, pack, false)?;
        scheduler.sync();

        let result = self.kernel.read_result()?;
        self.min_loc.resize((result.min_count as usize).min(self.min_loc.max_num_values()));
        self.max_loc.resize((result.max_count as usize).min(self.max_loc.max_num_values()));
        tracing::debug!(?result, "min/max location done");
        self.result = Some(result);
        Ok(())
    }
}

impl std::fmt::Debug for MinMaxLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinMaxLocation")
            .field("kernel", &self.kernel)
            .field("capacity", &self.min_loc.max_num_values())
            .field("result", &self.result)
            .finish()
    }
}
