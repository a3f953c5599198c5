// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool parameters and the shared size accounting handle.

use crate::PoolError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default soft cap on pooled memory: 16 MiB.
pub const DEFAULT_MAX_POOL_SIZE: usize = 16 * 1024 * 1024;

/// Aggregate size accounting shared by every bucket of a pool (and by every
/// pool that was handed the same `Arc`).
///
/// `total_size` is the number of provider bytes currently held in slabs,
/// whether their chunks are in use or retained for reuse. It is updated with
/// plain atomic adds and subtracts, so it is not linearizable with bucket
/// mutations: `max_size` is a soft cap.
#[derive(Debug)]
pub struct SharedLimits {
    max_size: usize,
    total_size: AtomicUsize,
}

impl SharedLimits {
    /// Creates limits with the given soft cap.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            total_size: AtomicUsize::new(0),
        }
    }

    /// The soft cap in bytes.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Provider bytes currently held in slabs.
    pub fn total_size(&self) -> usize {
        self.total_size.load(Ordering::Acquire)
    }

    /// Whether the pooled total is currently within the cap.
    pub fn within_cap(&self) -> bool {
        self.total_size() <= self.max_size
    }

    pub(crate) fn add(&self, bytes: usize) -> usize {
        self.total_size.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    pub(crate) fn sub(&self, bytes: usize) {
        self.total_size.fetch_sub(bytes, Ordering::AcqRel);
    }
}

impl Default for SharedLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOL_SIZE)
    }
}

/// Parameters of one [`DisjointPool`](crate::DisjointPool) instance.
#[derive(Debug, Clone)]
pub struct DisjointPoolConfig {
    /// Label used in logs and statistics.
    pub name: String,
    /// Minimum size requested from the provider for a slab.
    pub slab_min_size: usize,
    /// Requests above this size bypass pooling. `0` disables pooling.
    pub max_poolable_size: usize,
    /// Fully-free slabs retained per bucket before memory goes back to the
    /// provider.
    pub capacity: usize,
    /// Smallest size class. Must be a power of two.
    pub min_bucket_size: usize,
    /// `0`: silent. `1`: per-bucket summary on destruction. `2`: also log
    /// every malloc and free.
    pub pool_trace: u8,
    /// Shared accounting handle.
    pub limits: Arc<SharedLimits>,
}

impl DisjointPoolConfig {
    /// Sets the pool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shares `limits` with this pool.
    pub fn with_limits(mut self, limits: Arc<SharedLimits>) -> Self {
        self.limits = limits;
        self
    }

    /// Checks the parameters for consistency.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.slab_min_size == 0 {
            return Err(PoolError::InvalidConfig(
                "slab_min_size must be non-zero".into(),
            ));
        }
        if self.min_bucket_size == 0 || !self.min_bucket_size.is_power_of_two() {
            return Err(PoolError::InvalidConfig(format!(
                "min_bucket_size {} must be a non-zero power of two",
                self.min_bucket_size
            )));
        }
        if self.max_poolable_size > 0 && self.max_poolable_size < self.min_bucket_size {
            return Err(PoolError::InvalidConfig(format!(
                "max_poolable_size {} is below min_bucket_size {}",
                self.max_poolable_size, self.min_bucket_size
            )));
        }
        let chunks = self.slab_min_size.div_ceil(self.min_bucket_size);
        if self.max_poolable_size > 0 && u32::try_from(chunks).is_err() {
            return Err(PoolError::InvalidConfig(format!(
                "slab_min_size {} holds {chunks} chunks of {} bytes, more than {}",
                self.slab_min_size,
                self.min_bucket_size,
                u32::MAX
            )));
        }
        Ok(())
    }

    /// Size classes implied by this configuration.
    ///
    /// Classes grow geometrically from `min_bucket_size`, with one
    /// intermediate class (×1.5) between consecutive powers of two, and the
    /// last class is exactly `max_poolable_size`.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::new();
        if self.max_poolable_size == 0 {
            return sizes;
        }
        let mut size = self.min_bucket_size;
        while size < self.max_poolable_size {
            sizes.push(size);
            let mid = size + size / 2;
            if mid > size && mid < self.max_poolable_size {
                sizes.push(mid);
            }
            size = match size.checked_mul(2) {
                Some(next) => next,
                None => break,
            };
        }
        sizes.push(self.max_poolable_size);
        sizes
    }
}

impl Default for DisjointPoolConfig {
    fn default() -> Self {
        Self {
            name: "disjoint".to_string(),
            slab_min_size: 64 * 1024,
            max_poolable_size: 2 * 1024 * 1024,
            capacity: 4,
            min_bucket_size: 64,
            pool_trace: 0,
            limits: Arc::new(SharedLimits::default()),
        }
    }
}
