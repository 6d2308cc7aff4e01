// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Blob assignment from object lifetimes.
//!
//! Functions register their intermediate tensors in configuration order.
//! Each tensor's lifetime starts when it is registered and ends when its
//! size becomes known (at allocation time, once its last consumer has been
//! configured). A blob freed by an ended lifetime is handed to the next
//! object that starts, so tensors that are never alive at the same time
//! share memory, while tensors alive simultaneously always get distinct
//! blobs.
//!
//! ```text
//! start(a) → blob 0      start(b) → blob 1
//! end(a)   → blob 0 free
//! start(c) → blob 0      (reuses a's blob)
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of manager identities, so ids never match across managers.
static NEXT_OWNER: AtomicUsize = AtomicUsize::new(0);

/// Identifier of an object managed by a [`LifetimeManager`].
///
/// Only meaningful to the manager that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ObjectId {
    owner: usize,
    index: usize,
}

impl ObjectId {
    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone)]
struct ObjectRecord {
    blob: usize,
    /// Aligned size, set when the lifetime ends.
    size: Option<usize>,
}

/// Assigns blobs to objects based on their lifetimes.
#[derive(Debug, Clone)]
pub struct LifetimeManager {
    owner: usize,
    objects: Vec<ObjectRecord>,
    /// Required size of each blob: the largest object it ever holds.
    blob_sizes: Vec<usize>,
    /// Blobs released by ended lifetimes, most recently freed last.
    free_blobs: Vec<usize>,
}

impl Default for LifetimeManager {
    fn default() -> Self {
        Self {
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            objects: Vec::new(),
            blob_sizes: Vec::new(),
            free_blobs: Vec::new(),
        }
    }
}

impl LifetimeManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: ObjectId) -> Option<&ObjectRecord> {
        if id.owner != self.owner {
            return None;
        }
        self.objects.get(id.index)
    }

    /// Returns `true` if `id` was issued by this manager.
    pub fn owns(&self, id: ObjectId) -> bool {
        self.record(id).is_some()
    }

    /// Returns `true` once the lifetime of `id` has ended.
    pub fn is_finalized(&self, id: ObjectId) -> bool {
        self.record(id).is_some_and(|o| o.size.is_some())
    }

    /// Starts the lifetime of a new object and assigns it a blob.
    pub fn start_lifetime(&mut self) -> ObjectId {
        let blob = self.free_blobs.pop().unwrap_or_else(|| {
            self.blob_sizes.push(0);
            self.blob_sizes.len() - 1
        });
        self.objects.push(ObjectRecord { blob, size: None });
        ObjectId {
            owner: self.owner,
            index: self.objects.len() - 1,
        }
    }

    /// Ends the lifetime of `id`, recording its size rounded up to
    /// `alignment`. Its blob becomes available to later objects.
    ///
    /// # Panics
    /// Panics if `id` is unknown or its lifetime already ended.
    pub fn end_lifetime(&mut self, id: ObjectId, size: usize, alignment: usize) {
        assert!(self.owns(id), "unknown managed object {id:?}");
        let record = &mut self.objects[id.index];
        assert!(record.size.is_none(), "lifetime of {id:?} already ended");

        let aligned = align_up(size, alignment);
        record.size = Some(aligned);
        let blob = record.blob;
        self.blob_sizes[blob] = self.blob_sizes[blob].max(aligned);
        self.free_blobs.push(blob);
    }

    /// Returns `true` once every started lifetime has ended.
    pub fn are_all_finalized(&self) -> bool {
        self.objects.iter().all(|o| o.size.is_some())
    }

    /// Number of objects whose lifetime has not ended yet.
    pub fn pending(&self) -> usize {
        self.objects.iter().filter(|o| o.size.is_none()).count()
    }

    /// Required size of every blob.
    pub fn blob_sizes(&self) -> &[usize] {
        &self.blob_sizes
    }

    /// Blob assigned to `id`.
    pub fn blob_of(&self, id: ObjectId) -> Option<usize> {
        self.record(id).map(|o| o.blob)
    }

    /// Aligned size of `id`, once its lifetime has ended.
    pub fn size_of(&self, id: ObjectId) -> Option<usize> {
        self.record(id).and_then(|o| o.size)
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// Sum of all blob sizes: the memory the group needs when acquired.
    pub fn total_size(&self) -> usize {
        self.blob_sizes.iter().sum()
    }
}

fn align_up(size: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_objects_share_a_blob() {
        let mut lm = LifetimeManager::new();
        let a = lm.start_lifetime();
        lm.end_lifetime(a, 100, 1);
        let b = lm.start_lifetime();
        lm.end_lifetime(b, 300, 1);

        assert_eq!(lm.blob_of(a), lm.blob_of(b));
        assert_eq!(lm.blob_sizes(), &[300]);
    }

    #[test]
    fn test_overlapping_objects_get_distinct_blobs() {
        let mut lm = LifetimeManager::new();
        let a = lm.start_lifetime();
        let b = lm.start_lifetime();
        assert_ne!(lm.blob_of(a), lm.blob_of(b));
        lm.end_lifetime(a, 64, 1);
        lm.end_lifetime(b, 128, 1);

        // c starts after both ended and takes the most recently freed blob
        let c = lm.start_lifetime();
        assert_eq!(lm.blob_of(c), lm.blob_of(b));
        lm.end_lifetime(c, 32, 1);
        assert_eq!(lm.blob_sizes(), &[64, 128]);
        assert_eq!(lm.total_size(), 192);
    }

    #[test]
    fn test_chain_reuses_two_blobs() {
        // a → b → c → d where each tensor dies once the next is produced
        let mut lm = LifetimeManager::new();
        let a = lm.start_lifetime();
        let b = lm.start_lifetime();
        lm.end_lifetime(a, 10, 1);
        let c = lm.start_lifetime();
        lm.end_lifetime(b, 20, 1);
        let d = lm.start_lifetime();
        lm.end_lifetime(c, 30, 1);
        lm.end_lifetime(d, 40, 1);

        assert_eq!(lm.blob_sizes().len(), 2);
        assert_eq!(lm.blob_of(a), lm.blob_of(c));
        assert_eq!(lm.blob_of(b), lm.blob_of(d));
    }

    #[test]
    fn test_finalization_tracking() {
        let mut lm = LifetimeManager::new();
        assert!(lm.are_all_finalized());
        let a = lm.start_lifetime();
        assert!(!lm.are_all_finalized());
        assert_eq!(lm.pending(), 1);
        lm.end_lifetime(a, 10, 16);
        assert!(lm.are_all_finalized());
        assert_eq!(lm.size_of(a), Some(16));
    }

    #[test]
    #[should_panic(expected = "already ended")]
    fn test_double_end_panics() {
        let mut lm = LifetimeManager::new();
        let a = lm.start_lifetime();
        lm.end_lifetime(a, 10, 1);
        lm.end_lifetime(a, 10, 1);
    }

    #[test]
    fn test_ids_are_scoped_to_their_manager() {
        let mut first = LifetimeManager::new();
        let mut second = LifetimeManager::new();
        let a = first.start_lifetime();
        let b = second.start_lifetime();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);

        assert!(first.owns(a));
        assert!(!first.owns(b));
        assert_eq!(first.blob_of(b), None);
        assert_eq!(first.size_of(b), None);

        assert!(!first.is_finalized(a));
        first.end_lifetime(a, 8, 1);
        assert!(first.is_finalized(a));
    }

    #[test]
    #[should_panic(expected = "unknown managed object")]
    fn test_end_foreign_lifetime_panics() {
        let mut first = LifetimeManager::new();
        let mut second = LifetimeManager::new();
        let _a = first.start_lifetime();
        let b = second.start_lifetime();
        first.end_lifetime(b, 10, 1);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(10, 0), 10);
        assert_eq!(align_up(10, 1), 10);
        assert_eq!(align_up(10, 8), 16);
        assert_eq!(align_up(16, 8), 16);
    }
}
