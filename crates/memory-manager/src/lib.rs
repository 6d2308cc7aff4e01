// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Device memory management for intermediate tensors.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: a ceiling on pooled device memory, parsed from
//!   strings such as `"256M"`.
//! - [`BlobPool`]: hands out device blobs, keeps returned ones in a free
//!   list binned by size class, and tracks [`AllocationStats`].
//! - [`BlobGuard`]: RAII handle that returns its blob to the pool on drop.
//! - [`LifetimeManager`]: decides which objects may share a blob, based on
//!   the order in which their lifetimes start and end.
//! - [`MemoryGroup`]: binds the [`MemorySlot`] of every managed tensor to
//!   pooled memory between `acquire()` and `release()`.
//!
//! # Ownership Model
//!
//! ```text
//! MemoryGroup::acquire()
//!       │  one BlobPool::allocate() per lifetime blob
//!       ▼
//!   BlobGuard ◄─── held by the group while acquired
//!       │  sub_buffer(0, object size)
//!       ▼
//!   MemorySlot ──► read by the tensor allocator at run time
//!
//! MemoryGroup::release()  ──► slots cleared, guards dropped, blobs back
//!                             in the pool's free list
//! ```
//!
//! # Example
//! ```
//! use device_context::{ClContext, DeviceOptions};
//! use memory_manager::{BlobPool, MemoryBudget, MemoryGroup, MemorySlot};
//!
//! let ctx = ClContext::new(DeviceOptions::default());
//! let group = MemoryGroup::new(BlobPool::new(ctx, MemoryBudget::from_mb(4)));
//!
//! let slot = MemorySlot::new();
//! let id = group.manage(slot.clone());
//! group.finalize_memory(id, 4096, 64).unwrap();
//!
//! {
//!     let _scope = group.scope().unwrap();
//!     assert_eq!(slot.get().unwrap().size(), 4096);
//! }
//! assert!(slot.get().is_none());
//! ```

mod budget;
mod error;
mod group;
mod guard;
mod lifetime;
mod pool;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use group::{MemoryGroup, MemoryGroupScope, MemorySlot};
pub use guard::BlobGuard;
pub use lifetime::{LifetimeManager, ObjectId};
pub use pool::BlobPool;
pub use stats::AllocationStats;
