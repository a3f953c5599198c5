// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the disjoint pool.

use memory_provider::ProviderError;

/// Errors recorded by a [`DisjointPool`](crate::DisjointPool).
///
/// The malloc family returns `None` and leaves the error in
/// [`DisjointPool::last_result`](crate::DisjointPool::last_result);
/// [`DisjointPool::try_alloc`](crate::DisjointPool::try_alloc) returns it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool parameters are inconsistent.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Attempted to allocate a zero-sized buffer.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// The requested alignment is not a power of two.
    #[error("invalid alignment {0}: must be a power of two")]
    InvalidAlignment(usize),

    /// `num * size` (or an aligned size) overflowed.
    #[error("allocation size overflows usize")]
    SizeOverflow,

    /// The underlying provider failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The pointer was not handed out by this pool (or was already freed).
    #[error("pointer {0:#x} is not a live allocation of this pool")]
    UnknownPointer(usize),

    /// The operation needs CPU access to provider memory.
    #[error("{0} is not supported: provider memory is not host accessible")]
    Unsupported(&'static str),

    /// A human-readable size could not be parsed.
    #[error("invalid size string: {0}")]
    InvalidSize(String),

    /// An internal pool inconsistency was detected.
    #[error("pool integrity error: {0}")]
    PoolCorruption(String),
}
