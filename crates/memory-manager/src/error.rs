// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory management.

use device_context::ClError;

use crate::ObjectId;

/// Errors that can occur while pooling and sharing device memory.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryError {
    /// The requested blob would exceed the pool budget.
    #[error("out of memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// Attempted to allocate a zero-sized blob.
    #[error("cannot allocate zero-sized blob")]
    ZeroSizedAllocation,

    /// A budget string could not be parsed.
    #[error("invalid budget string '{0}': expected a number followed by an optional suffix (K, M, G)")]
    InvalidBudget(String),

    /// A memory group was acquired before every managed object reported
    /// its size.
    #[error("memory group has {pending} managed object(s) without a finalised size")]
    LifetimesNotFinalized { pending: usize },

    /// An object id does not belong to this group.
    #[error("unknown managed object {0:?}")]
    UnknownObject(ObjectId),

    /// The lifetime of an object was already ended.
    #[error("managed object {0:?} already has a finalised size")]
    AlreadyFinalized(ObjectId),

    /// The device refused the allocation.
    #[error("device error: {0}")]
    Device(#[from] ClError),
}
