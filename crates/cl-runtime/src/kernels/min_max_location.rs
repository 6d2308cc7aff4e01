// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Minimum and maximum of a 2-D image, with their locations.
//!
//! The kernel writes its results to device buffers: the min/max values,
//! the number of occurrences of each, and optionally the coordinates of
//! the occurrences into caller-provided [`ClCoordinates2DArray`]s. Counts
//! include occurrences that did not fit in an array.
//!
//! Every dispatch merges into the results already in the buffers, so a
//! window may be split across several dispatches. The results start out
//! reset after `configure`; call [`MinMaxLocationKernel::reset`] before
//! scanning a new image.

use std::mem::size_of;

use device_context::{ClContext, ClError, CommandQueue, DeviceBuffer, Event, MemFlags, NdRange};
use tensor_core::{DType, Status, TensorError, TensorInfo, Window};

use crate::element::{offset_of, CoordIter, ElementCodec};
use crate::kernel::{enqueue, for_each_slice, BoundTensor};
use crate::{
    BuildOptions, ClCoordinates2DArray, ClKernel, Coordinates2D, KernelCore, KernelLibrary, KernelType,
    RuntimeError, TensorPack, TensorSlot,
};

const OP: &str = "min_max_location";

/// `[min, max]` before any element has been seen.
const EMPTY_MIN_MAX: [f32; 2] = [f32::INFINITY, f32::NEG_INFINITY];

/// Values read back after a min/max dispatch.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MinMaxResult {
    pub min: f32,
    pub max: f32,
    pub min_count: u32,
    pub max_count: u32,
}

/// Destination of one kind of location.
#[derive(Debug, Clone)]
struct LocationTarget {
    buffer: DeviceBuffer,
    capacity: usize,
}

impl LocationTarget {
    fn new(array: Option<&ClCoordinates2DArray>) -> Option<Self> {
        array.map(|a| Self {
            buffer: a.cl_buffer().clone(),
            capacity: a.max_num_values(),
        })
    }
}

#[derive(Debug)]
pub struct MinMaxLocationKernel {
    core: KernelCore,
    /// `[min, max]` as `f32`.
    min_max: DeviceBuffer,
    /// `[min_count, max_count]` as `u32`.
    counts: DeviceBuffer,
    min_loc: Option<LocationTarget>,
    max_loc: Option<LocationTarget>,
}

impl MinMaxLocationKernel {
    pub fn validate(src: &TensorInfo) -> Status {
        if !matches!(src.dtype(), DType::U8 | DType::S16 | DType::F32) {
            return Err(TensorError::UnsupportedDType { op: OP, dtype: src.dtype() });
        }
        // trailing unit dimensions still describe a 2-D image
        if src.shape().dims().iter().skip(2).any(|&d| d > 1) {
            return Err(TensorError::Unsupported {
                op: OP,
                detail: format!("expected a 2-D image, got {}", src.shape()),
            });
        }
        if src.shape().num_elements() == 0 {
            return Err(TensorError::Uninitialised { op: OP });
        }
        Ok(())
    }

    pub fn configure(
        library: &KernelLibrary,
        context: &ClContext,
        src: &TensorInfo,
        min_loc: Option<&ClCoordinates2DArray>,
        max_loc: Option<&ClCoordinates2DArray>,
    ) -> Result<Self, RuntimeError> {
        Self::validate(src)?;

        let mut opts = BuildOptions::new();
        opts.add_option(format!("-DDATA_TYPE={}", src.dtype().cl_type_name()));
        opts.add_option_if(min_loc.is_some(), "-DLOCATE_MIN");
        opts.add_option_if(max_loc.is_some(), "-DLOCATE_MAX");
        let program = library.create_kernel("minmaxloc", &opts)?;

        let mut core = KernelCore::new(library, program, KernelType::Unknown);
        core.configure_window(Window::from_shape(src.shape(), &[1]));
        core.set_config_id(format!(
            "minmaxloc_{}_{}_{}",
            src.dtype().as_str(),
            src.shape().dim(0),
            src.shape().dim(1)
        ));

        let min_max = context.create_buffer(MemFlags::ReadWrite, 2 * size_of::<f32>())?;
        let counts = context.create_buffer(MemFlags::ReadWrite, 2 * size_of::<u32>())?;
        min_max.write(0, bytemuck::cast_slice(&EMPTY_MIN_MAX))?;
        counts.fill(0);

        Ok(Self {
            core,
            min_max,
            counts,
            min_loc: LocationTarget::new(min_loc),
            max_loc: LocationTarget::new(max_loc),
        })
    }

    /// Enqueues a reset of the accumulated results, ordered after any
    /// earlier dispatch on `queue`.
    pub fn reset(&self, queue: &CommandQueue) -> Event {
        let min_max = self.min_max.clone();
        let counts = self.counts.clone();
        queue.enqueue_ndrange("minmaxloc_reset", NdRange::new(1, 1, 1), None, move || {
            min_max.bytes()[..8].copy_from_slice(bytemuck::cast_slice(&EMPTY_MIN_MAX));
            counts.bytes()[..8].fill(0);
        })
    }

    /// Reads the results accumulated since the last reset. The queue must
    /// have been finished since.
    pub fn read_result(&self) -> Result<MinMaxResult, ClError> {
        let mut values = [0u8; 8];
        let mut counts = [0u8; 8];
        self.min_max.read(0, &mut values)?;
        self.counts.read(0, &mut counts)?;
        let [min, max]: [f32; 2] = bytemuck::cast(values);
        let [min_count, max_count]: [u32; 2] = bytemuck::cast(counts);
        Ok(MinMaxResult {
            min,
            max,
            min_count,
            max_count,
        })
    }
}

impl ClKernel for MinMaxLocationKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut KernelCore {
        &mut self.core
    }

    fn run(&self, pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError> {
        debug_assert!(window.is_subwindow_of(self.window()), "window outside the kernel's window");
        let src = pack.bind(self.name(), TensorSlot::Src0)?;

        for_each_slice(window, |slice| {
            let body = MinMaxSlice {
                src: src.clone(),
                min_max: self.min_max.clone(),
                counts: self.counts.clone(),
                min_loc: self.min_loc.clone(),
                max_loc: self.max_loc.clone(),
                slice,
            };
            enqueue(
                queue,
                self,
                &slice,
                self.lws_hint(),
                self.core.use_dummy_work_items(),
                move || body.execute(),
            );
            Ok(())
        })
    }
}

struct MinMaxSlice {
    src: BoundTensor,
    min_max: DeviceBuffer,
    counts: DeviceBuffer,
    min_loc: Option<LocationTarget>,
    max_loc: Option<LocationTarget>,
    slice: Window,
}

impl MinMaxSlice {
    fn execute(self) {
        let input = self.src.buffer.to_vec();
        let codec = ElementCodec::new(&self.src.info);
        let values: Vec<_> = CoordIter::window(&self.slice, self.src.info.shape())
            .map(|c| (c, codec.load(&input, offset_of(&self.src.info, &c))))
            .collect();

        let (slice_min, slice_max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, v)| (lo.min(*v), hi.max(*v)));

        let mut prev_min_max = [0u8; 8];
        let mut prev_counts = [0u8; 8];
        prev_min_max.copy_from_slice(&self.min_max.bytes()[..8]);
        prev_counts.copy_from_slice(&self.counts.bytes()[..8]);
        let [prev_min, prev_max]: [f32; 2] = bytemuck::cast(prev_min_max);
        let [prev_min_count, prev_max_count]: [u32; 2] = bytemuck::cast(prev_counts);

        // a new extremum restarts its count and locations
        let (min, min_start) = if slice_min < prev_min {
            (slice_min, 0)
        } else {
            (prev_min, prev_min_count)
        };
        let (max, max_start) = if slice_max > prev_max {
            (slice_max, 0)
        } else {
            (prev_max, prev_max_count)
        };
        let min_count = record_locations(&values, min, min_start, self.min_loc.as_ref());
        let max_count = record_locations(&values, max, max_start, self.max_loc.as_ref());

        self.min_max.bytes()[..8].copy_from_slice(bytemuck::cast_slice(&[min, max]));
        self.counts.bytes()[..8].copy_from_slice(bytemuck::cast_slice(&[min_count, max_count]));
    }
}

/// Appends the coordinates of every element equal to `target` after the
/// first `start` entries, as far as they fit. Returns the new total
/// number of matches.
fn record_locations(
    values: &[(crate::element::Coords, f32)],
    target: f32,
    start: u32,
    loc: Option<&LocationTarget>,
) -> u32 {
    let mut bytes = loc.map(|l| l.buffer.bytes());
    let capacity = loc.map_or(0, |l| l.capacity);
    let mut count = start as usize;
    for (c, v) in values {
        if *v != target {
            continue;
        }
        if let Some(bytes) = bytes.as_mut().filter(|_| count < capacity) {
            let point = Coordinates2D {
                x: c[0] as i32,
                y: c[1] as i32,
            };
            let at = count * size_of::<Coordinates2D>();
            bytes[at..at + size_of::<Coordinates2D>()].copy_from_slice(bytemuck::bytes_of(&point));
        }
        count += 1;
    }
    count as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::DeviceOptions;
    use tensor_core::Shape;

    use crate::ClTensor;

    #[test]
    fn test_validate() {
        assert!(MinMaxLocationKernel::validate(&TensorInfo::new(Shape::d2(4, 4), DType::U8)).is_ok());
        assert!(MinMaxLocationKernel::validate(&TensorInfo::new(Shape::d3(4, 4, 1), DType::S16)).is_ok());
        assert!(matches!(
            MinMaxLocationKernel::validate(&TensorInfo::new(Shape::d2(4, 4), DType::F16)),
            Err(TensorError::UnsupportedDType { .. })
        ));
        assert!(matches!(
            MinMaxLocationKernel::validate(&TensorInfo::new(Shape::d3(4, 4, 2), DType::F32)),
            Err(TensorError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_min_max_and_locations() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let library = KernelLibrary::new(ctx.options().clone());

        let mut src = ClTensor::new(&ctx, TensorInfo::new(Shape::d2(3, 2), DType::F32));
        src.allocate().unwrap();
        src.copy_from_f32(&queue, &[5.0, -2.0, 9.0, -2.0, 9.0, 9.0]).unwrap();

        // room for one min and two max locations
        let min_loc = ClCoordinates2DArray::new(&ctx, 1).unwrap();
        let max_loc = ClCoordinates2DArray::new(&ctx, 2).unwrap();
        let k = MinMaxLocationKernel::configure(&library, &ctx, src.info(), Some(&min_loc), Some(&max_loc)).unwrap();
        assert_eq!(k.name(), "minmaxloc");
        assert_eq!(k.kernel_type(), KernelType::Unknown);

        k.run(&TensorPack::new().with(TensorSlot::Src0, &src), k.window(), &queue).unwrap();
        queue.finish();
        let result = k.read_result().unwrap();
        assert_eq!(
            result,
            MinMaxResult {
                min: -2.0,
                max: 9.0,
                min_count: 2,
                max_count: 3,
            }
        );

        let mut max_loc = max_loc;
        max_loc.resize(2);
        assert_eq!(
            max_loc.download().unwrap(),
            vec![Coordinates2D { x: 2, y: 0 }, Coordinates2D { x: 1, y: 1 }]
        );
    }

    #[test]
    fn test_split_window_merges_results() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let library = KernelLibrary::new(ctx.options().clone());

        // row 0 holds the maximum, row 1 a new minimum and another maximum
        let mut src = ClTensor::new(&ctx, TensorInfo::new(Shape::d2(3, 2), DType::F32));
        src.allocate().unwrap();
        src.copy_from_f32(&queue, &[1.0, 8.0, 4.0, 8.0, -3.0, 2.0]).unwrap();

        let max_loc = ClCoordinates2DArray::new(&ctx, 4).unwrap();
        let k = MinMaxLocationKernel::configure(&library, &ctx, src.info(), None, Some(&max_loc)).unwrap();
        let pack = TensorPack::new().with(TensorSlot::Src0, &src);

        for y in 0..2 {
            let mut rows = *k.window();
            rows.set(Window::DIM_Y, tensor_core::Dimension::new(y, y + 1, 1));
            k.run(&pack, &rows, &queue).unwrap();
        }
        queue.finish();
        assert_eq!(
            k.read_result().unwrap(),
            MinMaxResult {
                min: -3.0,
                max: 8.0,
                min_count: 1,
                max_count: 2,
            }
        );

        let mut max_loc = max_loc;
        max_loc.resize(2);
        assert_eq!(
            max_loc.download().unwrap(),
            vec![Coordinates2D { x: 1, y: 0 }, Coordinates2D { x: 0, y: 1 }]
        );
    }

    #[test]
    fn test_reset_clears_accumulated_results() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let library = KernelLibrary::new(ctx.options().clone());

        let mut src = ClTensor::new(&ctx, TensorInfo::new(Shape::d2(2, 2), DType::U8));
        src.allocate().unwrap();
        src.copy_from_f32(&queue, &[3.0, 3.0, 5.0, 3.0]).unwrap();

        let k = MinMaxLocationKernel::configure(&library, &ctx, src.info(), None, None).unwrap();
        let pack = TensorPack::new().with(TensorSlot::Src0, &src);
        k.run(&pack, k.window(), &queue).unwrap();
        k.run(&pack, k.window(), &queue).unwrap();
        queue.finish();
        // without a reset the second pass counts every occurrence again
        assert_eq!(k.read_result().unwrap().min_count, 6);

        k.reset(&queue);
        k.run(&pack, k.window(), &queue).unwrap();
        queue.finish();
        let result = k.read_result().unwrap();
        assert_eq!((result.min, result.max), (3.0, 5.0));
        assert_eq!((result.min_count, result.max_count), (3, 1));
    }
}
