// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-capacity typed arrays in device memory.
//!
//! A [`ClArray`] owns one device buffer sized for its maximum capacity.
//! Its logical length (`num_values`) moves freely between zero and that
//! capacity; the buffer is never reallocated. Element access goes through
//! a host mapping, exactly like tensor access.

use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use device_context::{ClContext, ClError, CommandQueue, DeviceBuffer, Event, HostMapping, MemFlags};

/// A 2-D integer coordinate, as stored by location-reporting kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable, serde::Serialize)]
#[repr(C)]
pub struct Coordinates2D {
    pub x: i32,
    pub y: i32,
}

/// Typed array backed by a device buffer.
pub struct ClArray<T: Pod> {
    buffer: DeviceBuffer,
    max_num_values: usize,
    num_values: usize,
    mapping: Option<HostMapping>,
    _marker: PhantomData<T>,
}

pub type ClFloatArray = ClArray<f32>;
pub type ClInt32Array = ClArray<i32>;
pub type ClUInt32Array = ClArray<u32>;
pub type ClCoordinates2DArray = ClArray<Coordinates2D>;

impl<T: Pod> ClArray<T> {
    /// Creates an empty array able to hold `max_num_values` elements.
    ///
    /// # Errors
    /// Returns [`ClError::SizeOverflow`] when the byte size does not fit in
    /// `usize`, or the device error if the buffer cannot be created.
    pub fn new(context: &ClContext, max_num_values: usize) -> Result<Self, ClError> {
        let size = max_num_values
            .checked_mul(size_of::<T>())
            .ok_or(ClError::SizeOverflow {
                count: max_num_values,
                elem: size_of::<T>(),
            })?
            .max(1);
        let buffer = context.create_buffer(MemFlags::ReadWrite, size)?;
        tracing::debug!(max_num_values, elem = size_of::<T>(), "created device array");
        Ok(Self {
            buffer,
            max_num_values,
            num_values: 0,
            mapping: None,
            _marker: PhantomData,
        })
    }

    pub fn max_num_values(&self) -> usize {
        self.max_num_values
    }

    pub fn num_values(&self) -> usize {
        self.num_values
    }

    pub fn is_empty(&self) -> bool {
        self.num_values == 0
    }

    /// Sets the logical length.
    ///
    /// # Panics
    /// Panics if `num` exceeds the capacity.
    pub fn resize(&mut self, num: usize) {
        assert!(
            num <= self.max_num_values,
            "cannot resize array to {num} values, capacity is {}",
            self.max_num_values
        );
        self.num_values = num;
    }

    pub fn clear(&mut self) {
        self.num_values = 0;
    }

    /// The device buffer, for kernel binding.
    pub fn cl_buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    // ── Mapping ─────────────────────────────────────────────────

    /// Maps the whole capacity for host access.
    ///
    /// # Panics
    /// Panics if the array is already mapped.
    pub fn map(&mut self, queue: &CommandQueue, blocking: bool) {
        assert!(self.mapping.is_none(), "array is already mapped");
        self.mapping = Some(queue.enqueue_map(&self.buffer, blocking));
    }

    /// Enqueues the unmap. Does not wait for it.
    ///
    /// # Panics
    /// Panics if the array is not mapped.
    pub fn unmap(&mut self, queue: &CommandQueue) -> Event {
        let Some(mapping) = self.mapping.take() else {
            panic!("unmap() called on an array that is not mapped");
        };
        queue.enqueue_unmap(mapping)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    fn mapping(&self) -> &HostMapping {
        self.mapping
            .as_ref()
            .unwrap_or_else(|| panic!("array accessed on the host while unmapped"))
    }

    // ── Host access (mapped only) ───────────────────────────────

    /// Element `index`.
    ///
    /// # Panics
    /// Panics if unmapped or `index >= num_values()`.
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.num_values, "index {index} out of range ({} values)", self.num_values);
        let bytes = self.mapping().bytes();
        let at = index * size_of::<T>();
        bytemuck::pod_read_unaligned(&bytes[at..at + size_of::<T>()])
    }

    /// Overwrites element `index`.
    ///
    /// # Panics
    /// Panics if unmapped or `index >= num_values()`.
    pub fn set(&mut self, index: usize, value: T) {
        assert!(index < self.num_values, "index {index} out of range ({} values)", self.num_values);
        let mut bytes = self.mapping().bytes();
        let at = index * size_of::<T>();
        bytes[at..at + size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
    }

    /// Appends `value`. Returns `false`, leaving the array unchanged, when
    /// it is full.
    ///
    /// # Panics
    /// Panics if unmapped.
    pub fn push(&mut self, value: T) -> bool {
        if self.num_values == self.max_num_values {
            return false;
        }
        self.num_values += 1;
        self.set(self.num_values - 1, value);
        true
    }

    /// Copies the first `num_values()` elements out.
    ///
    /// # Panics
    /// Panics if unmapped.
    pub fn to_vec(&self) -> Vec<T> {
        let bytes = self.mapping().bytes();
        bytes[..self.num_values * size_of::<T>()]
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    // ── Blocking transfers ──────────────────────────────────────

    /// Writes `values` to the start of the buffer and sets the logical
    /// length to match. Blocking; no mapping required.
    ///
    /// # Panics
    /// Panics if `values` exceeds the capacity.
    pub fn upload(&mut self, values: &[T]) -> Result<(), ClError> {
        assert!(
            values.len() <= self.max_num_values,
            "cannot upload {} values into an array of capacity {}",
            values.len(),
            self.max_num_values
        );
        self.buffer.write(0, bytemuck::cast_slice(values))?;
        self.num_values = values.len();
        Ok(())
    }

    /// Reads the first `num_values()` elements with a blocking transfer.
    pub fn download(&self) -> Result<Vec<T>, ClError> {
        let mut raw = vec![0u8; self.num_values * size_of::<T>()];
        self.buffer.read(0, &mut raw)?;
        Ok(raw
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

impl<T: Pod> std::fmt::Debug for ClArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClArray")
            .field("type", &std::any::type_name::<T>())
            .field("num_values", &self.num_values)
            .field("max_num_values", &self.max_num_values)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
