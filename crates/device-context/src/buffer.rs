// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device buffers.
//!
//! A [`DeviceBuffer`] is a cheap-clone handle onto a region of a shared
//! storage. Sub-buffers share the storage of their parent, so memory
//! groups can carve several tensors out of one blob.
//!
//! Storage contents sit behind a mutex so handles are `Send + Sync`. The
//! runtime drives the device from a single host thread, so the lock is
//! never contended; a contended lock means a host view is still held
//! while a command touches the same memory, and panics instead of
//! deadlocking.

use std::ops::{Deref, DerefMut, Range};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::context::ContextInner;
use crate::ClError;

/// Access flags a buffer was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemFlags {
    #[default]
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

pub(crate) struct Storage {
    id: usize,
    size: usize,
    data: Mutex<Vec<u8>>,
    context: Arc<ContextInner>,
}

impl Storage {
    pub(crate) fn new(id: usize, size: usize, context: Arc<ContextInner>) -> Self {
        Self {
            id,
            size,
            data: Mutex::new(vec![0u8; size]),
            context,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        match self.data.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => panic!(
                "device storage {} is already borrowed by a host view; \
                 drop mapped views before running commands on the same memory",
                self.id
            ),
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.context.release(self.size);
        tracing::debug!(id = self.id, size = self.size, "device buffer released");
    }
}

/// Handle to a region of device memory.
#[derive(Clone)]
pub struct DeviceBuffer {
    storage: Arc<Storage>,
    offset: usize,
    size: usize,
    flags: MemFlags,
}

impl DeviceBuffer {
    pub(crate) fn from_storage(storage: Arc<Storage>, flags: MemFlags) -> Self {
        let size = storage.size;
        Self {
            storage,
            offset: 0,
            size,
            flags,
        }
    }

    /// Size of this region in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Offset of this region inside its storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    /// Identifier of the underlying storage.
    pub fn storage_id(&self) -> usize {
        self.storage.id
    }

    /// Number of handles sharing the underlying storage.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Creates a handle onto `[offset, offset + size)` of this region.
    pub fn sub_buffer(&self, offset: usize, size: usize) -> Result<DeviceBuffer, ClError> {
        if size == 0 || offset.checked_add(size).map_or(true, |end| end > self.size) {
            return Err(ClError::InvalidSubBuffer {
                offset,
                size,
                parent: self.size,
            });
        }
        Ok(DeviceBuffer {
            storage: Arc::clone(&self.storage),
            offset: self.offset + offset,
            size,
            flags: self.flags,
        })
    }

    /// Returns `true` if both handles refer to the same storage.
    pub fn same_storage(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Returns `true` if the two regions share at least one byte.
    pub fn overlaps(&self, other: &DeviceBuffer) -> bool {
        self.same_storage(other)
            && self.offset < other.offset + other.size
            && other.offset < self.offset + self.size
    }

    /// Blocking host-to-device copy of `bytes` at `offset`.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), ClError> {
        let range = self.checked_range(offset, bytes.len())?;
        self.storage.lock()[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Blocking device-to-host copy into `out` from `offset`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), ClError> {
        let range = self.checked_range(offset, out.len())?;
        out.copy_from_slice(&self.storage.lock()[range]);
        Ok(())
    }

    /// Reads the whole region into a new vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let start = self.offset;
        self.storage.lock()[start..start + self.size].to_vec()
    }

    /// Sets every byte of the region to `value`.
    pub fn fill(&self, value: u8) {
        let start = self.offset;
        self.storage.lock()[start..start + self.size].fill(value);
    }

    /// Locks the region for direct host access.
    pub fn bytes(&self) -> BufferBytes<'_> {
        BufferBytes {
            guard: self.storage.lock(),
            range: self.offset..self.offset + self.size,
        }
    }

    fn checked_range(&self, offset: usize, len: usize) -> Result<Range<usize>, ClError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(self.offset + offset..self.offset + end),
            _ => Err(ClError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("storage", &self.storage.id)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

/// Locked host view of a [`DeviceBuffer`] region.
pub struct BufferBytes<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    range: Range<usize>,
}

impl Deref for BufferBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[self.range.clone()]
    }
}

impl DerefMut for BufferBytes<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let range = self.range.clone();
        &mut self.guard[range]
    }
}

#[cfg(test)]
mod tests {
    use crate::{ClContext, ClError, DeviceOptions, MemFlags};

    #[test]
    fn test_write_read_roundtrip() {
        let ctx = ClContext::new(DeviceOptions::default());
        let buf = ctx.create_buffer(MemFlags::ReadWrite, 16).unwrap();
        buf.write(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 6];
        buf.read(2, &mut out).unwrap();
        assert_eq!(out, [0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds_transfer() {
        let ctx = ClContext::new(DeviceOptions::default());
        let buf = ctx.create_buffer(MemFlags::ReadWrite, 8).unwrap();
        let err = buf.write(6, &[0; 4]).unwrap_err();
        assert!(matches!(err, ClError::OutOfBounds { .. }));
    }

    #[test]
    fn test_sub_buffer_shares_storage() {
        let ctx = ClContext::new(DeviceOptions::default());
        let buf = ctx.create_buffer(MemFlags::ReadWrite, 64).unwrap();
        let a = buf.sub_buffer(0, 32).unwrap();
        let b = buf.sub_buffer(32, 32).unwrap();
        let c = buf.sub_buffer(16, 32).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));

        b.write(0, &[7; 4]).unwrap();
        let mut out = [0u8; 4];
        buf.read(32, &mut out).unwrap();
        assert_eq!(out, [7; 4]);

        assert!(buf.sub_buffer(60, 8).is_err());
        assert!(buf.sub_buffer(0, 0).is_err());
    }

    #[test]
    fn test_distinct_storages_never_overlap() {
        let ctx = ClContext::new(DeviceOptions::default());
        let a = ctx.create_buffer(MemFlags::ReadWrite, 8).unwrap();
        let b = ctx.create_buffer(MemFlags::ReadWrite, 8).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a.clone()));
    }

    #[test]
    fn test_bytes_view() {
        let ctx = ClContext::new(DeviceOptions::default());
        let buf = ctx.create_buffer(MemFlags::ReadWrite, 8).unwrap();
        let sub = buf.sub_buffer(4, 4).unwrap();
        {
            let mut view = sub.bytes();
            assert_eq!(view.len(), 4);
            view.copy_from_slice(&[9, 8, 7, 6]);
        }
        assert_eq!(buf.to_vec(), vec![0, 0, 0, 0, 9, 8, 7, 6]);
    }

    #[test]
    #[should_panic(expected = "already borrowed by a host view")]
    fn test_nested_lock_panics() {
        let ctx = ClContext::new(DeviceOptions::default());
        let buf = ctx.create_buffer(MemFlags::ReadWrite, 8).unwrap();
        let _view = buf.bytes();
        buf.fill(0);
    }
}
