// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII guard that returns a blob to its pool on drop.

use std::sync::Arc;

use device_context::DeviceBuffer;

use crate::pool::PoolInner;
use crate::MemoryError;

/// A pooled device blob.
///
/// Dropping the guard hands the blob back to the [`crate::BlobPool`]'s
/// free list. Handles obtained through [`BlobGuard::buffer`] keep the
/// device storage alive but do not keep the blob reserved.
pub struct BlobGuard {
    /// Full-capacity blob. `Option` so `drop` can move it out.
    blob: Option<DeviceBuffer>,
    /// The requested prefix of `blob`.
    view: DeviceBuffer,
    size_bytes: usize,
    pool: Arc<PoolInner>,
}

impl BlobGuard {
    pub(crate) fn new(
        blob: DeviceBuffer,
        size_bytes: usize,
        pool: Arc<PoolInner>,
    ) -> Result<Self, MemoryError> {
        let view = match blob.sub_buffer(0, size_bytes) {
            Ok(view) => view,
            Err(e) => {
                pool.return_blob(blob);
                return Err(e.into());
            }
        };
        Ok(Self {
            blob: Some(blob),
            view,
            size_bytes,
            pool,
        })
    }

    /// The usable region, exactly as large as requested.
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.view
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Capacity of the underlying blob (its size class).
    pub fn capacity(&self) -> usize {
        self.blob.as_ref().map_or(0, DeviceBuffer::size)
    }
}

impl Drop for BlobGuard {
    fn drop(&mut self) {
        if let Some(blob) = self.blob.take() {
            self.pool.return_blob(blob);
        }
    }
}

impl std::fmt::Debug for BlobGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobGuard")
            .field("size_bytes", &self.size_bytes)
            .field("capacity", &self.capacity())
            .finish()
    }
}
