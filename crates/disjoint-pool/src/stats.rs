// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Usage statistics for pool tracing and tuning.
//!
//! Each bucket keeps a [`BucketStats`] under its own lock; the pool adds
//! the counters that are not tied to a size class. [`PoolStats`] is the
//! snapshot handed to callers.

/// Counters for one size class.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BucketStats {
    /// Chunk size of this bucket.
    pub chunk_size: usize,
    /// Chunks handed out.
    pub allocations: u64,
    /// Chunks returned.
    pub frees: u64,
    /// Allocations served from a slab the bucket already held.
    pub pool_hits: u64,
    /// Slabs requested from the provider.
    pub slab_allocations: u64,
    /// Slabs returned to the provider.
    pub slab_releases: u64,
    /// Slabs currently held (in use or retained).
    pub slabs_held: usize,
    /// High-water mark of `slabs_held`.
    pub max_slabs_held: usize,
    /// Fully-free slabs currently retained.
    pub retained_slabs: usize,
}

impl BucketStats {
    pub(crate) fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Default::default()
        }
    }

    pub(crate) fn record_allocation(&mut self, pool_hit: bool) {
        self.allocations += 1;
        if pool_hit {
            self.pool_hits += 1;
        }
    }

    pub(crate) fn record_free(&mut self) {
        self.frees += 1;
    }

    pub(crate) fn record_slab_allocation(&mut self) {
        self.slab_allocations += 1;
        self.slabs_held += 1;
        self.max_slabs_held = self.max_slabs_held.max(self.slabs_held);
    }

    pub(crate) fn record_slab_release(&mut self) {
        self.slab_releases += 1;
        self.slabs_held -= 1;
    }
}

/// Snapshot of a pool's statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Requests served directly by the provider.
    pub large_allocations: u64,
    /// Direct allocations returned to the provider.
    pub large_frees: u64,
    /// Malloc-family calls that returned null.
    pub failures: u64,
    /// Provider bytes held in this pool's slabs.
    pub pooled_bytes: usize,
    /// High-water mark of `pooled_bytes`.
    pub peak_pooled_bytes: usize,
    /// Per size class counters, smallest class first.
    pub buckets: Vec<BucketStats>,
}

impl PoolStats {
    /// Pooled allocations plus direct allocations.
    pub fn total_allocations(&self) -> u64 {
        self.large_allocations + self.buckets.iter().map(|b| b.allocations).sum::<u64>()
    }

    /// Slabs requested from the provider across every bucket.
    pub fn slab_allocations(&self) -> u64 {
        self.buckets.iter().map(|b| b.slab_allocations).sum()
    }

    /// Fraction of pooled allocations served without a provider call.
    ///
    /// Returns `0.0` if nothing was pooled.
    pub fn pool_hit_ratio(&self) -> f64 {
        let allocs: u64 = self.buckets.iter().map(|b| b.allocations).sum();
        if allocs == 0 {
            return 0.0;
        }
        let hits: u64 = self.buckets.iter().map(|b| b.pool_hits).sum();
        hits as f64 / allocs as f64
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_pooled_bytes as f64 / (1024.0 * 1024.0);
        format!(
            "Pool '{}': {} allocations ({:.0}% pool hits), {} slabs fetched, \
             {} direct, {} failures, peak {:.2} MB pooled",
            self.name,
            self.total_allocations(),
            self.pool_hit_ratio() * 100.0,
            self.slab_allocations(),
            self.large_allocations,
            self.failures,
            peak_mb,
        )
    }
}
