// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory groups.
//!
//! A [`MemoryGroup`] owns the backing memory of a set of intermediate
//! tensors. Each tensor allocator registers a [`MemorySlot`] with the group
//! at configure time and reports its size when it is allocated. Before the
//! function runs, [`MemoryGroup::acquire`] takes one blob per lifetime blob
//! from the [`BlobPool`] and binds every slot to a sub-buffer of its blob;
//! [`MemoryGroup::release`] unbinds the slots and returns the blobs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use device_context::DeviceBuffer;

use crate::{BlobGuard, BlobPool, LifetimeManager, MemoryError, ObjectId};

/// Shared cell through which a group hands memory to a tensor allocator.
///
/// Empty while the group is released.
#[derive(Clone, Default)]
pub struct MemorySlot {
    buffer: Arc<Mutex<Option<DeviceBuffer>>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound buffer, if the owning group is acquired.
    pub fn get(&self) -> Option<DeviceBuffer> {
        lock(&self.buffer).clone()
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.buffer).is_some()
    }

    fn bind(&self, buffer: DeviceBuffer) {
        *lock(&self.buffer) = Some(buffer);
    }

    fn unbind(&self) {
        *lock(&self.buffer) = None;
    }
}

impl std::fmt::Debug for MemorySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySlot")
            .field("bound", &self.is_bound())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct GroupInner {
    pool: BlobPool,
    lifetimes: LifetimeManager,
    slots: Vec<(ObjectId, MemorySlot)>,
    /// Blobs held while acquired.
    blobs: Vec<BlobGuard>,
}

/// Handle to a memory group. Clones share the group.
#[derive(Clone)]
pub struct MemoryGroup {
    inner: Arc<Mutex<GroupInner>>,
}

impl MemoryGroup {
    pub fn new(pool: BlobPool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GroupInner {
                pool,
                lifetimes: LifetimeManager::new(),
                slots: Vec::new(),
                blobs: Vec::new(),
            })),
        }
    }

    fn inner(&self) -> MutexGuard<'_, GroupInner> {
        lock(&self.inner)
    }

    /// Registers `slot` and starts its lifetime.
    pub fn manage(&self, slot: MemorySlot) -> ObjectId {
        let mut inner = self.inner();
        let id = inner.lifetimes.start_lifetime();
        inner.slots.push((id, slot));
        tracing::debug!(?id, "memory group manages new object");
        id
    }

    /// Ends the lifetime of `id`, recording the memory it needs.
    ///
    /// # Errors
    /// - [`MemoryError::UnknownObject`] if `id` was issued by another group.
    /// - [`MemoryError::AlreadyFinalized`] if its lifetime already ended.
    pub fn finalize_memory(&self, id: ObjectId, size: usize, alignment: usize) -> Result<(), MemoryError> {
        let mut inner = self.inner();
        if !inner.lifetimes.owns(id) {
            return Err(MemoryError::UnknownObject(id));
        }
        if inner.lifetimes.is_finalized(id) {
            return Err(MemoryError::AlreadyFinalized(id));
        }
        inner.lifetimes.end_lifetime(id, size, alignment);
        tracing::debug!(?id, size, alignment, "memory group object finalised");
        Ok(())
    }

    /// Binds every managed slot to memory from the pool.
    ///
    /// Acquiring an already acquired group does nothing.
    ///
    /// # Errors
    /// - [`MemoryError::LifetimesNotFinalized`] if some object has not
    ///   reported its size yet.
    /// - Any pool error; no slot is bound in that case.
    pub fn acquire(&self) -> Result<(), MemoryError> {
        let mut inner = self.inner();
        if !inner.blobs.is_empty() {
            return Ok(());
        }
        if !inner.lifetimes.are_all_finalized() {
            return Err(MemoryError::LifetimesNotFinalized {
                pending: inner.lifetimes.pending(),
            });
        }

        let mut blobs = Vec::with_capacity(inner.lifetimes.blob_sizes().len());
        for &size in inner.lifetimes.blob_sizes() {
            blobs.push(inner.pool.allocate(size.max(1))?);
        }

        for (id, slot) in &inner.slots {
            let (Some(blob), Some(size)) = (inner.lifetimes.blob_of(*id), inner.lifetimes.size_of(*id))
            else {
                continue;
            };
            let buffer = blobs[blob].buffer().sub_buffer(0, size.max(1))?;
            slot.bind(buffer);
        }
        tracing::debug!(blobs = blobs.len(), objects = inner.slots.len(), "memory group acquired");
        inner.blobs = blobs;
        Ok(())
    }

    /// Unbinds every slot and returns the blobs to the pool.
    pub fn release(&self) {
        let mut inner = self.inner();
        for (_, slot) in &inner.slots {
            slot.unbind();
        }
        let released = inner.blobs.len();
        inner.blobs.clear();
        if released > 0 {
            tracing::debug!(blobs = released, "memory group released");
        }
    }

    /// Acquires the group for the lifetime of the returned scope.
    pub fn scope(&self) -> Result<MemoryGroupScope<'_>, MemoryError> {
        self.acquire()?;
        Ok(MemoryGroupScope { group: self })
    }

    pub fn is_acquired(&self) -> bool {
        !self.inner().blobs.is_empty()
    }

    pub fn num_managed(&self) -> usize {
        self.inner().slots.len()
    }

    pub fn are_all_finalized(&self) -> bool {
        self.inner().lifetimes.are_all_finalized()
    }

    /// Size of every blob the group takes from the pool when acquired.
    pub fn blob_sizes(&self) -> Vec<usize> {
        self.inner().lifetimes.blob_sizes().to_vec()
    }

    /// Blob assigned to `id`.
    pub fn blob_of(&self, id: ObjectId) -> Option<usize> {
        self.inner().lifetimes.blob_of(id)
    }
}

impl std::fmt::Debug for MemoryGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner();
        f.debug_struct("MemoryGroup")
            .field("managed", &inner.slots.len())
            .field("blobs", &inner.lifetimes.blob_sizes())
            .field("acquired", &!inner.blobs.is_empty())
            .finish()
    }
}

/// Keeps a [`MemoryGroup`] acquired until dropped.
pub struct MemoryGroupScope<'a> {
    group: &'a MemoryGroup,
}

impl Drop for MemoryGroupScope<'_> {
    fn drop(&mut self) {
        self.group.release();
    }
}
