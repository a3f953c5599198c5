// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One size class of the pool.
//!
//! A bucket carves provider slabs into equal chunks and keeps the free ones
//! in a per-slab stack. Slabs with at least one free chunk are listed in
//! `available` (ordered by address, so allocations pack into low slabs
//! first). Every bucket has its own lock; the only state shared between
//! buckets is the slab registry and the [`SharedLimits`] counter.
//!
//! ```text
//! Bucket (chunk = 96 B)
//!   slab 0x7f..000 [■■■□□□□ ... ]   free_chunks: [6, 5, 4, 3]
//!   slab 0x7f..800 [□□□□□□□ ... ]   fully free, retained
//! ```

use crate::config::SharedLimits;
use crate::stats::BucketStats;
use crate::PoolError;
use memory_provider::ProviderHandle;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Largest alignment a chunk is guaranteed to carry.
pub(crate) const MAX_CHUNK_ALIGNMENT: usize = 4096;

/// Registry entry for a slab, keyed by its start address.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlabEntry {
    pub bucket: usize,
    pub len: usize,
}

/// Address-ordered map of every slab held by a pool.
pub(crate) type SlabRegistry = RwLock<BTreeMap<usize, SlabEntry>>;

/// State shared by every bucket of a pool.
#[derive(Debug)]
pub(crate) struct PoolShared {
    pub provider: ProviderHandle,
    pub limits: Arc<SharedLimits>,
    pub registry: SlabRegistry,
    pub capacity: usize,
    /// Slab bytes held by this pool alone (`limits` may be shared).
    pub held: AtomicUsize,
    pub peak: AtomicUsize,
}

impl PoolShared {
    pub fn new(provider: ProviderHandle, limits: Arc<SharedLimits>, capacity: usize) -> Self {
        Self {
            provider,
            limits,
            registry: RwLock::new(BTreeMap::new()),
            capacity,
            held: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn acquire(&self, bytes: usize) {
        self.limits.add(bytes);
        let held = self.held.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(held, Ordering::AcqRel);
    }

    fn release(&self, bytes: usize) {
        self.limits.sub(bytes);
        self.held.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Finds the slab containing `addr`, if any.
    pub fn lookup(&self, addr: usize) -> Option<(usize, SlabEntry)> {
        let registry = self.registry.read().ok()?;
        let (&start, &entry) = registry.range(..=addr).next_back()?;
        (addr < start + entry.len).then_some((start, entry))
    }
}

#[derive(Debug)]
struct Slab {
    free_chunks: Vec<u32>,
    in_use: Vec<bool>,
    allocated: usize,
}

impl Slab {
    /// Chunk indices are stored as `u32`.
    fn new(num_chunks: usize) -> Result<Self, PoolError> {
        let count = u32::try_from(num_chunks).map_err(|_| {
            PoolError::InvalidConfig(format!("{num_chunks} chunks per slab exceeds {}", u32::MAX))
        })?;
        Ok(Self {
            free_chunks: (0..count).rev().collect(),
            in_use: vec![false; num_chunks],
            allocated: 0,
        })
    }
}

#[derive(Debug)]
struct BucketState {
    slabs: HashMap<usize, Slab>,
    available: BTreeSet<usize>,
    free_slabs: usize,
    stats: BucketStats,
}

/// A single size class.
#[derive(Debug)]
pub(crate) struct Bucket {
    index: usize,
    chunk_size: usize,
    slab_size: usize,
    chunk_alignment: usize,
    state: Mutex<BucketState>,
}

impl Bucket {
    pub fn new(index: usize, chunk_size: usize, slab_min_size: usize) -> Self {
        let chunks_per_slab = slab_min_size.div_ceil(chunk_size).max(1);
        let chunk_alignment = (1usize << chunk_size.trailing_zeros()).min(MAX_CHUNK_ALIGNMENT);
        Self {
            index,
            chunk_size,
            slab_size: chunks_per_slab * chunk_size,
            chunk_alignment,
            state: Mutex::new(BucketState {
                slabs: HashMap::new(),
                available: BTreeSet::new(),
                free_slabs: 0,
                stats: BucketStats::new(chunk_size),
            }),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_alignment(&self) -> usize {
        self.chunk_alignment
    }

    #[cfg(test)]
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BucketState>, PoolError> {
        self.state
            .lock()
            .map_err(|_| PoolError::PoolCorruption(format!("bucket {} lock poisoned", self.chunk_size)))
    }

    /// Hands out one chunk, fetching a new slab if every held slab is full.
    ///
    /// On provider failure nothing is recorded and the bucket is unchanged.
    pub fn alloc(&self, shared: &PoolShared) -> Result<NonNull<u8>, PoolError> {
        let mut state = self.lock()?;

        if let Some(start) = state.available.first().copied() {
            let chunk_size = self.chunk_size;
            let (chunk, was_empty, now_full) = {
                let slab = state.slabs.get_mut(&start).ok_or_else(|| {
                    PoolError::PoolCorruption(format!("slab {start:#x} listed but not held"))
                })?;
                let chunk = slab.free_chunks.pop().ok_or_else(|| {
                    PoolError::PoolCorruption(format!("slab {start:#x} listed without free chunks"))
                })? as usize;
                let was_empty = slab.allocated == 0;
                slab.in_use[chunk] = true;
                slab.allocated += 1;
                (chunk, was_empty, slab.free_chunks.is_empty())
            };
            if was_empty {
                state.free_slabs -= 1;
            }
            if now_full {
                state.available.remove(&start);
            }
            state.stats.record_allocation(true);
            return chunk_ptr(start + chunk * chunk_size);
        }

        let mut slab = Slab::new(self.slab_size / self.chunk_size)?;
        let base = shared.provider.alloc(self.slab_size, self.chunk_alignment)?;
        let start = base.as_ptr() as usize;
        shared.acquire(self.slab_size);
        match shared.registry.write() {
            Ok(mut registry) => {
                registry.insert(
                    start,
                    SlabEntry {
                        bucket: self.index,
                        len: self.slab_size,
                    },
                );
            }
            Err(_) => {
                // SAFETY: `base` was just returned by the provider for `slab_size`.
                let _ = unsafe { shared.provider.free(base, self.slab_size) };
                shared.release(self.slab_size);
                return Err(PoolError::PoolCorruption("slab registry lock poisoned".into()));
            }
        }

        slab.free_chunks.pop();
        slab.in_use[0] = true;
        slab.allocated = 1;
        let has_room = !slab.free_chunks.is_empty();
        state.slabs.insert(start, slab);
        if has_room {
            state.available.insert(start);
        }
        state.stats.record_slab_allocation();
        state.stats.record_allocation(false);
        tracing::debug!(
            bucket = self.chunk_size,
            slab = start,
            slab_size = self.slab_size,
            "slab allocated"
        );
        Ok(base)
    }

    /// Returns the chunk at `addr` (inside the slab starting at `start`).
    pub fn free(&self, shared: &PoolShared, start: usize, addr: usize) -> Result<(), PoolError> {
        let mut state = self.lock()?;
        let offset = addr - start;
        if offset % self.chunk_size != 0 {
            return Err(PoolError::UnknownPointer(addr));
        }
        let chunk = offset / self.chunk_size;

        let (now_empty, had_none_free) = {
            let slab = state
                .slabs
                .get_mut(&start)
                .ok_or(PoolError::UnknownPointer(addr))?;
            if !slab.in_use.get(chunk).copied().unwrap_or(false) {
                return Err(PoolError::UnknownPointer(addr));
            }
            let had_none_free = slab.free_chunks.is_empty();
            slab.in_use[chunk] = false;
            slab.free_chunks.push(chunk as u32);
            slab.allocated -= 1;
            (slab.allocated == 0, had_none_free)
        };
        state.stats.record_free();
        if had_none_free {
            state.available.insert(start);
        }

        if now_empty {
            let retain = state.free_slabs < shared.capacity && shared.limits.within_cap();
            state.free_slabs += 1;
            if !retain {
                self.release_slab(&mut state, shared, start)?;
            }
        }
        Ok(())
    }

    /// Hands every retained fully-free slab back to the provider.
    pub fn trim(&self, shared: &PoolShared) -> Result<usize, PoolError> {
        let mut state = self.lock()?;
        let empty: Vec<usize> = state
            .slabs
            .iter()
            .filter(|(_, slab)| slab.allocated == 0)
            .map(|(&start, _)| start)
            .collect();
        for &start in &empty {
            self.release_slab(&mut state, shared, start)?;
        }
        Ok(empty.len())
    }

    /// Releases every slab, including ones with chunks still in use.
    ///
    /// Returns the number of chunks that were still allocated.
    pub fn release_all(&self, shared: &PoolShared) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let starts: Vec<usize> = state.slabs.keys().copied().collect();
        let leaked = state.slabs.values().map(|slab| slab.allocated).sum();
        for start in starts {
            if let Err(e) = self.release_slab(&mut state, shared, start) {
                tracing::warn!(bucket = self.chunk_size, "failed to release slab: {e}");
            }
        }
        leaked
    }

    /// Current statistics for this bucket.
    pub fn stats(&self) -> BucketStats {
        match self.state.lock() {
            Ok(state) => {
                let mut stats = state.stats.clone();
                stats.retained_slabs = state.free_slabs;
                stats
            }
            Err(_) => BucketStats::new(self.chunk_size),
        }
    }

    fn release_slab(
        &self,
        state: &mut BucketState,
        shared: &PoolShared,
        start: usize,
    ) -> Result<(), PoolError> {
        let Some(slab) = state.slabs.remove(&start) else {
            return Ok(());
        };
        state.available.remove(&start);
        if slab.allocated == 0 && state.free_slabs > 0 {
            state.free_slabs -= 1;
        }
        if let Ok(mut registry) = shared.registry.write() {
            registry.remove(&start);
        }
        let base = chunk_ptr(start)?;
        // SAFETY: `start` was returned by this provider for exactly `slab_size`
        // bytes and has just been removed from every bucket structure.
        let result = unsafe { shared.provider.free(base, self.slab_size) };
        shared.release(self.slab_size);
        state.stats.record_slab_release();
        tracing::debug!(
            bucket = self.chunk_size,
            slab = start,
            "slab released"
        );
        result.map_err(PoolError::from)
    }
}

fn chunk_ptr(addr: usize) -> Result<NonNull<u8>, PoolError> {
    NonNull::new(addr as *mut u8)
        .ok_or_else(|| PoolError::PoolCorruption("null chunk address".into()))
}
