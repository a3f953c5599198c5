// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII allocation that returns memory to its pool on drop.
//!
//! Every slot a memory handle owns (device slots, host stagings, integrated
//! host copies) is a [`UsmAllocation`], so releasing a handle frees each of
//! them exactly once without any bookkeeping in the handle itself.

use disjoint_pool::DisjointPool;
use memory_provider::UsmType;
use std::ptr::NonNull;
use std::sync::Arc;

/// Memory obtained from a USM pool.
///
/// Dropping the allocation frees it; a failing free is logged, since drop
/// cannot report it.
pub struct UsmAllocation {
    ptr: NonNull<u8>,
    size: usize,
    kind: UsmType,
    pool: Arc<DisjointPool>,
}

impl UsmAllocation {
    pub(crate) fn new(ptr: NonNull<u8>, size: usize, kind: UsmType, pool: Arc<DisjointPool>) -> Self {
        Self {
            ptr,
            size,
            kind,
            pool,
        }
    }

    /// Start of the allocation.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Requested size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Memory kind of the owning pool.
    pub fn kind(&self) -> UsmType {
        self.kind
    }

    /// Name of the pool the memory came from.
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }
}

impl Drop for UsmAllocation {
    fn drop(&mut self) {
        if let Err(e) = self.pool.free(self.ptr) {
            tracing::error!(
                pool = self.pool_name(),
                kind = %self.kind,
                size = self.size,
                "failed to free memory: {e}"
            );
        }
    }
}

// The allocation exclusively owns its memory; the pool is Send + Sync.
unsafe impl Send for UsmAllocation {}
unsafe impl Sync for UsmAllocation {}

impl std::fmt::Debug for UsmAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsmAllocation")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("pool", &self.pool_name())
            .finish()
    }
}
