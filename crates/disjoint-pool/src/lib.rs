// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # disjoint-pool
//!
//! A size-classed slab allocator that sits above one memory provider and
//! recycles equal-size regions so hot allocation paths avoid provider
//! round trips.
//!
//! # Key Components
//!
//! - [`DisjointPool`]: the allocator: malloc, calloc, realloc,
//!   aligned_malloc, usable-size queries, free, and trim.
//! - [`DisjointPoolConfig`]: slab size, pooling cutoff, retained-slab
//!   capacity, smallest size class, and trace level.
//! - [`SharedLimits`]: the soft cap and running total of provider bytes
//!   held in slabs, shared by every bucket of a pool.
//! - [`ByteSize`]: human-readable sizes (`"64K"`, `"2M"`).
//! - [`PoolStats`]: per-pool and per-bucket counters.
//!
//! # Layout
//!
//! ```text
//! DisjointPool
//!   ├── bucket   64 B  ── slab ── slab
//!   ├── bucket   96 B  ── slab
//!   ├── ...
//!   ├── bucket  max_poolable_size
//!   └── large allocations (1:1 with the provider)
//!                 │
//!                 ▼
//!          MemoryProvider
//! ```
//!
//! A slab is fetched when a bucket has no free chunk and is handed back
//! once it is fully free and the bucket already retains `capacity` free
//! slabs (or the shared total is over its cap).

mod bucket;
mod config;
mod error;
mod pool;
mod size;
mod stats;

pub use config::{DisjointPoolConfig, SharedLimits, DEFAULT_MAX_POOL_SIZE};
pub use error::PoolError;
pub use pool::DisjointPool;
pub use size::ByteSize;
pub use stats::{BucketStats, PoolStats};
