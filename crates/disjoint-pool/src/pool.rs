// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The disjoint pool: size-classed buckets above one memory provider.
//!
//! Requests up to `max_poolable_size` are rounded up to the covering size
//! class and served from that bucket's slabs. Larger requests go straight
//! to the provider and are tracked one to one until freed.
//!
//! # Failure reporting
//! The malloc family never panics and never returns an error value: a
//! failed call returns `None` and leaves the cause in
//! [`DisjointPool::last_result`].

use crate::bucket::{Bucket, PoolShared};
use crate::{DisjointPoolConfig, PoolError, PoolStats, SharedLimits};
use memory_provider::ProviderHandle;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Counters {
    large_allocations: u64,
    large_frees: u64,
    failures: u64,
}

/// A pooling allocator over a single [`MemoryProvider`](memory_provider::MemoryProvider).
///
/// `DisjointPool` is `Send + Sync`; every bucket has its own lock, so
/// threads working in different size classes do not contend.
///
/// # Example
/// ```
/// use disjoint_pool::{DisjointPool, DisjointPoolConfig};
/// use memory_provider::{create, SystemProvider, SystemProviderParams, UsmType};
///
/// let provider = create::<SystemProvider>(SystemProviderParams::new(UsmType::Host)).unwrap();
/// let pool = DisjointPool::new(&[provider], DisjointPoolConfig::default()).unwrap();
///
/// let ptr = pool.malloc(100).unwrap();
/// assert_eq!(pool.malloc_usable_size(ptr), 128);
/// pool.free(ptr).unwrap();
/// ```
#[derive(Debug)]
pub struct DisjointPool {
    name: String,
    shared: PoolShared,
    buckets: Vec<Bucket>,
    max_poolable_size: usize,
    pool_trace: u8,
    large: Mutex<HashMap<usize, usize>>,
    counters: Mutex<Counters>,
    last_error: Mutex<Option<PoolError>>,
}

impl DisjointPool {
    /// Creates a pool over exactly one provider.
    pub fn new(providers: &[ProviderHandle], config: DisjointPoolConfig) -> Result<Self, PoolError> {
        let provider = match providers {
            [provider] => Arc::clone(provider),
            _ => {
                return Err(PoolError::InvalidConfig(format!(
                    "expected exactly one memory provider, got {}",
                    providers.len()
                )))
            }
        };
        config.validate()?;

        let buckets: Vec<Bucket> = config
            .bucket_sizes()
            .into_iter()
            .enumerate()
            .map(|(index, size)| Bucket::new(index, size, config.slab_min_size))
            .collect();

        tracing::info!(
            pool = %config.name,
            provider = provider.name(),
            buckets = buckets.len(),
            max_poolable = config.max_poolable_size,
            capacity = config.capacity,
            "disjoint pool created"
        );

        Ok(Self {
            name: config.name,
            shared: PoolShared::new(provider, config.limits, config.capacity),
            buckets,
            max_poolable_size: config.max_poolable_size,
            pool_trace: config.pool_trace,
            large: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            last_error: Mutex::new(None),
        })
    }

    /// Pool name from the configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider slabs and large allocations come from.
    pub fn provider(&self) -> &ProviderHandle {
        &self.shared.provider
    }

    /// The accounting handle this pool reports into.
    pub fn limits(&self) -> &Arc<SharedLimits> {
        &self.shared.limits
    }

    /// Chunk sizes of every size class, smallest first.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets.iter().map(Bucket::chunk_size).collect()
    }

    /// Allocates `size` bytes.
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        let result = self.try_malloc(size);
        self.finish("malloc", size, result)
    }

    /// Like [`malloc`](Self::malloc), but returns the failure of this call
    /// instead of leaving it only in [`last_result`](Self::last_result),
    /// which concurrent callers may overwrite.
    pub fn try_alloc(&self, size: usize) -> Result<NonNull<u8>, PoolError> {
        let result = self.try_malloc(size);
        self.observe("malloc", size, result)
    }

    /// Allocates `num * size` zeroed bytes.
    pub fn calloc(&self, num: usize, size: usize) -> Option<NonNull<u8>> {
        let result = num
            .checked_mul(size)
            .ok_or(PoolError::SizeOverflow)
            .and_then(|total| {
                self.require_host_access("calloc")?;
                let ptr = self.try_malloc(total)?;
                // SAFETY: the pool just handed out at least `total` writable bytes.
                unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, total) };
                Ok(ptr)
            });
        self.finish("calloc", num.saturating_mul(size), result)
    }

    /// Moves the allocation at `ptr` into a block of `size` bytes.
    ///
    /// A `None` pointer behaves like [`malloc`](Self::malloc). A zero size
    /// frees `ptr` and returns `None`. Otherwise a new block is always
    /// allocated, the common prefix copied, and the old block freed.
    pub fn realloc(&self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(old) = ptr else {
            return self.malloc(size);
        };
        if size == 0 {
            if let Err(e) = self.try_free(old) {
                self.record_failure(e);
            }
            return None;
        }
        let result = self.try_realloc(old, size);
        self.finish("realloc", size, result)
    }

    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// Alignments of 0 and 1 mean "no requirement".
    pub fn aligned_malloc(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        let result = self.try_aligned_malloc(size, alignment);
        self.finish("aligned_malloc", size, result)
    }

    /// Bytes actually usable at `ptr`: the chunk size for pooled memory,
    /// the requested size for direct allocations, `0` if unknown.
    pub fn malloc_usable_size(&self, ptr: NonNull<u8>) -> usize {
        let addr = ptr.as_ptr() as usize;
        if let Some((_, entry)) = self.shared.lookup(addr) {
            return self.buckets[entry.bucket].chunk_size();
        }
        self.large
            .lock()
            .ok()
            .and_then(|large| large.get(&addr).copied())
            .unwrap_or(0)
    }

    /// Returns `ptr` to the pool.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), PoolError> {
        let result = self.try_free(ptr);
        if self.pool_trace >= 2 {
            tracing::debug!(pool = %self.name, ptr = ptr.as_ptr() as usize, ok = result.is_ok(), "free");
        }
        if let Err(e) = &result {
            self.record_failure(e.clone());
        }
        result
    }

    /// The error behind the most recent failed call, if any.
    pub fn last_result(&self) -> Option<PoolError> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Releases every retained fully-free slab. Returns how many were released.
    pub fn trim(&self) -> Result<usize, PoolError> {
        let mut released = 0;
        for bucket in &self.buckets {
            released += bucket.trim(&self.shared)?;
        }
        if released > 0 {
            tracing::debug!(pool = %self.name, released, "pool trimmed");
        }
        Ok(released)
    }

    /// Snapshot of this pool's counters.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            name: self.name.clone(),
            pooled_bytes: self.shared.held.load(Ordering::Acquire),
            peak_pooled_bytes: self.shared.peak.load(Ordering::Acquire),
            buckets: self.buckets.iter().map(Bucket::stats).collect(),
            ..Default::default()
        };
        if let Ok(counters) = self.counters.lock() {
            stats.large_allocations = counters.large_allocations;
            stats.large_frees = counters.large_frees;
            stats.failures = counters.failures;
        }
        stats
    }

    fn try_malloc(&self, size: usize) -> Result<NonNull<u8>, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroSizedAllocation);
        }
        if size > self.max_poolable_size {
            return self.alloc_large(size, 0);
        }
        let index = self.buckets.partition_point(|b| b.chunk_size() < size);
        match self.buckets.get(index) {
            Some(bucket) => bucket.alloc(&self.shared),
            None => self.alloc_large(size, 0),
        }
    }

    fn try_aligned_malloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, PoolError> {
        if alignment <= 1 {
            return self.try_malloc(size);
        }
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment(alignment));
        }
        if size == 0 {
            return Err(PoolError::ZeroSizedAllocation);
        }
        let aligned_size = size
            .checked_add(alignment - 1)
            .ok_or(PoolError::SizeOverflow)?
            & !(alignment - 1);

        if aligned_size <= self.max_poolable_size {
            let start = self.buckets.partition_point(|b| b.chunk_size() < aligned_size);
            if let Some(bucket) = self.buckets[start..]
                .iter()
                .find(|b| b.chunk_alignment() >= alignment)
            {
                return bucket.alloc(&self.shared);
            }
        }
        self.alloc_large(aligned_size, alignment)
    }

    fn try_realloc(&self, old: NonNull<u8>, size: usize) -> Result<NonNull<u8>, PoolError> {
        self.require_host_access("realloc")?;
        let old_size = self.malloc_usable_size(old);
        if old_size == 0 {
            return Err(PoolError::UnknownPointer(old.as_ptr() as usize));
        }
        let new = self.try_malloc(size)?;
        // SAFETY: both blocks are live, distinct, and at least this long.
        unsafe { std::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_size.min(size)) };
        if let Err(e) = self.try_free(old) {
            let _ = self.try_free(new);
            return Err(e);
        }
        Ok(new)
    }

    fn try_free(&self, ptr: NonNull<u8>) -> Result<(), PoolError> {
        let addr = ptr.as_ptr() as usize;
        if let Some((start, entry)) = self.shared.lookup(addr) {
            return self.buckets[entry.bucket].free(&self.shared, start, addr);
        }

        let size = self
            .large
            .lock()
            .map_err(|_| PoolError::PoolCorruption("large allocation map poisoned".into()))?
            .remove(&addr)
            .ok_or(PoolError::UnknownPointer(addr))?;
        // SAFETY: `addr` was returned by this provider for `size` bytes and
        // has just been removed from the large allocation map.
        unsafe { self.shared.provider.free(ptr, size)? };
        if let Ok(mut counters) = self.counters.lock() {
            counters.large_frees += 1;
        }
        Ok(())
    }

    fn alloc_large(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, PoolError> {
        let ptr = self.shared.provider.alloc(size, alignment)?;
        match self.large.lock() {
            Ok(mut large) => {
                large.insert(ptr.as_ptr() as usize, size);
            }
            Err(_) => {
                // SAFETY: `ptr` was just returned by the provider for `size`.
                let _ = unsafe { self.shared.provider.free(ptr, size) };
                return Err(PoolError::PoolCorruption("large allocation map poisoned".into()));
            }
        }
        if let Ok(mut counters) = self.counters.lock() {
            counters.large_allocations += 1;
        }
        Ok(ptr)
    }

    fn require_host_access(&self, operation: &'static str) -> Result<(), PoolError> {
        if self.shared.provider.host_accessible() {
            Ok(())
        } else {
            Err(PoolError::Unsupported(operation))
        }
    }

    fn finish(
        &self,
        operation: &'static str,
        size: usize,
        result: Result<NonNull<u8>, PoolError>,
    ) -> Option<NonNull<u8>> {
        self.observe(operation, size, result).ok()
    }

    fn observe(
        &self,
        operation: &'static str,
        size: usize,
        result: Result<NonNull<u8>, PoolError>,
    ) -> Result<NonNull<u8>, PoolError> {
        match &result {
            Ok(ptr) => {
                if self.pool_trace >= 2 {
                    tracing::debug!(pool = %self.name, operation, size, ptr = ptr.as_ptr() as usize, "allocated");
                }
            }
            Err(e) => {
                tracing::debug!(pool = %self.name, operation, size, "allocation failed: {e}");
                self.record_failure(e.clone());
            }
        }
        result
    }

    fn record_failure(&self, error: PoolError) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.failures += 1;
        }
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error);
        }
    }
}

impl Drop for DisjointPool {
    fn drop(&mut self) {
        if self.pool_trace >= 1 {
            let stats = self.stats();
            tracing::info!("{}", stats.summary());
            for bucket in stats.buckets.iter().filter(|b| b.allocations > 0) {
                tracing::info!(
                    pool = %self.name,
                    chunk_size = bucket.chunk_size,
                    allocations = bucket.allocations,
                    frees = bucket.frees,
                    pool_hits = bucket.pool_hits,
                    slabs = bucket.slab_allocations,
                    max_slabs = bucket.max_slabs_held,
                    "bucket usage"
                );
            }
        }

        let leaked: usize = self
            .buckets
            .iter()
            .map(|bucket| bucket.release_all(&self.shared))
            .sum();

        let large: Vec<(usize, usize)> = match self.large.get_mut() {
            Ok(large) => large.drain().collect(),
            Err(_) => Vec::new(),
        };
        for &(addr, size) in &large {
            if let Some(ptr) = NonNull::new(addr as *mut u8) {
                // SAFETY: every entry was returned by the provider for `size`.
                if let Err(e) = unsafe { self.shared.provider.free(ptr, size) } {
                    tracing::warn!(pool = %self.name, "failed to free large allocation: {e}");
                }
            }
        }

        if leaked > 0 || !large.is_empty() {
            tracing::warn!(
                pool = %self.name,
                chunks = leaked,
                large = large.len(),
                "pool dropped with live allocations"
            );
        }
        tracing::info!(pool = %self.name, "disjoint pool destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_provider::{create, NullProvider, SystemProvider, SystemProviderParams, UsmType};

    fn host_pool(config: DisjointPoolConfig) -> DisjointPool {
        let provider = create::<SystemProvider>(SystemProviderParams::new(UsmType::Host)).unwrap();
        DisjointPool::new(&[provider], config).unwrap()
    }

    #[test]
    fn test_requires_exactly_one_provider() {
        let err = DisjointPool::new(&[], DisjointPoolConfig::default()).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));

        let p: ProviderHandle = Arc::new(NullProvider);
        let err = DisjointPool::new(&[p.clone(), p], DisjointPoolConfig::default()).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let provider: ProviderHandle = Arc::new(NullProvider);
        let config = DisjointPoolConfig {
            min_bucket_size: 3,
            ..Default::default()
        };
        assert!(DisjointPool::new(&[provider], config).is_err());
    }

    #[test]
    fn test_zero_size_is_null_with_diagnostic() {
        let pool = host_pool(DisjointPoolConfig::default());
        assert!(pool.malloc(0).is_none());
        assert_eq!(pool.last_result(), Some(PoolError::ZeroSizedAllocation));
        assert_eq!(pool.stats().failures, 1);
    }

    #[test]
    fn test_try_alloc_returns_its_own_failure() {
        let pool = host_pool(DisjointPoolConfig::default());
        assert!(pool.aligned_malloc(64, 3).is_none());
        assert_eq!(pool.last_result(), Some(PoolError::InvalidAlignment(3)));

        assert_eq!(pool.try_alloc(0), Err(PoolError::ZeroSizedAllocation));
        assert_eq!(pool.stats().failures, 2);

        let p = pool.try_alloc(128).unwrap();
        assert_eq!(pool.malloc_usable_size(p), 128);
        pool.free(p).unwrap();
    }

    #[test]
    fn test_usable_size_is_chunk_size() {
        let pool = host_pool(DisjointPoolConfig::default());
        let p = pool.malloc(65).unwrap();
        assert_eq!(pool.malloc_usable_size(p), 96);
        pool.free(p).unwrap();

        let big = pool.malloc(3 * 1024 * 1024).unwrap();
        assert_eq!(pool.malloc_usable_size(big), 3 * 1024 * 1024);
        pool.free(big).unwrap();
    }

    #[test]
    fn test_calloc_zeroes_reused_chunk() {
        let pool = host_pool(DisjointPoolConfig::default());
        let p = pool.malloc(256).unwrap();
        unsafe { std::ptr::write_bytes(p.as_ptr(), 0xAB, 256) };
        pool.free(p).unwrap();

        let z = pool.calloc(4, 64).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(z.as_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
        pool.free(z).unwrap();
    }

    #[test]
    fn test_calloc_overflow() {
        let pool = host_pool(DisjointPoolConfig::default());
        assert!(pool.calloc(usize::MAX, 2).is_none());
        assert_eq!(pool.last_result(), Some(PoolError::SizeOverflow));
    }

    #[test]
    fn test_realloc_moves_and_copies() {
        let pool = host_pool(DisjointPoolConfig::default());
        let p = pool.malloc(64).unwrap();
        unsafe { std::ptr::copy_nonoverlapping(b"abcdefgh".as_ptr(), p.as_ptr(), 8) };

        let q = pool.realloc(Some(p), 1000).unwrap();
        assert_ne!(p, q);
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), 8) };
        assert_eq!(bytes, b"abcdefgh");
        assert_eq!(pool.free(p), Err(PoolError::UnknownPointer(p.as_ptr() as usize)));

        assert!(pool.realloc(Some(q), 0).is_none());
        assert_eq!(pool.free(q), Err(PoolError::UnknownPointer(q.as_ptr() as usize)));
    }

    #[test]
    fn test_realloc_null_is_malloc() {
        let pool = host_pool(DisjointPoolConfig::default());
        let p = pool.realloc(None, 10).unwrap();
        assert_eq!(pool.malloc_usable_size(p), 64);
        pool.free(p).unwrap();
    }

    #[test]
    fn test_aligned_malloc() {
        let pool = host_pool(DisjointPoolConfig::default());
        for alignment in [2, 64, 256, 4096] {
            let p = pool.aligned_malloc(100, alignment).unwrap();
            assert_eq!(p.as_ptr() as usize % alignment, 0, "alignment {alignment}");
            pool.free(p).unwrap();
        }

        // Larger than any chunk can guarantee: served directly.
        let p = pool.aligned_malloc(100, 64 * 1024).unwrap();
        assert_eq!(p.as_ptr() as usize % (64 * 1024), 0);
        assert_eq!(pool.stats().large_allocations, 1);
        pool.free(p).unwrap();

        assert!(pool.aligned_malloc(100, 48).is_none());
        assert_eq!(pool.last_result(), Some(PoolError::InvalidAlignment(48)));
    }

    #[test]
    fn test_unknown_pointer() {
        let pool = host_pool(DisjointPoolConfig::default());
        let bogus = NonNull::new(0x1000 as *mut u8).unwrap();
        assert_eq!(pool.free(bogus), Err(PoolError::UnknownPointer(0x1000)));
        assert_eq!(pool.malloc_usable_size(bogus), 0);
    }

    #[test]
    fn test_not_host_accessible() {
        let provider: ProviderHandle = Arc::new(NullProvider);
        let pool = DisjointPool::new(&[provider], DisjointPoolConfig::default()).unwrap();
        assert!(pool.calloc(1, 64).is_none());
        assert_eq!(pool.last_result(), Some(PoolError::Unsupported("calloc")));
    }

    #[test]
    fn test_pooling_disabled_goes_direct() {
        let pool = host_pool(DisjointPoolConfig {
            max_poolable_size: 0,
            ..Default::default()
        });
        let p = pool.malloc(64).unwrap();
        assert_eq!(pool.stats().large_allocations, 1);
        assert_eq!(pool.limits().total_size(), 0);
        pool.free(p).unwrap();
        assert_eq!(pool.stats().large_frees, 1);
    }
}
