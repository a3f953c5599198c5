// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Call-counting decorator around another provider.

use crate::{InitProvider, MemoryAdvice, MemoryProvider, ProviderError, ProviderHandle};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

/// Forwards every call to an inner provider and counts it per operation.
///
/// Operation names are the provider API names: `"alloc"`, `"free"`,
/// `"set_attrs"`, `"get_last_result"`, `"get_recommended_page_size"`,
/// `"get_min_page_size"`, `"purge_lazy"`, `"purge_force"`, `"name"`.
///
/// # Example
/// ```
/// use memory_provider::{create, MemoryProvider, NullProvider, TracingProvider};
///
/// let traced = TracingProvider::new(create::<NullProvider>(()).unwrap());
/// let ptr = traced.alloc(64, 0).unwrap();
/// unsafe { traced.free(ptr, 64).unwrap() };
/// assert_eq!(traced.calls("alloc"), 1);
/// assert_eq!(traced.calls("free"), 1);
/// ```
#[derive(Debug)]
pub struct TracingProvider {
    inner: ProviderHandle,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl TracingProvider {
    /// Wraps `inner`.
    pub fn new(inner: ProviderHandle) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Number of times `op` has been forwarded.
    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Snapshot of every counter.
    pub fn call_counts(&self) -> HashMap<&'static str, usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// The decorated provider.
    pub fn inner(&self) -> &ProviderHandle {
        &self.inner
    }

    fn trace(&self, op: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
        tracing::trace!(provider = self.inner.name(), op, "provider call");
    }
}

impl InitProvider for TracingProvider {
    type Params = ProviderHandle;

    fn initialize(inner: ProviderHandle) -> Result<Self, ProviderError> {
        Ok(Self::new(inner))
    }
}

impl MemoryProvider for TracingProvider {
    fn name(&self) -> &str {
        self.trace("name");
        self.inner.name()
    }

    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, ProviderError> {
        self.trace("alloc");
        self.inner.alloc(size, alignment)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ProviderError> {
        self.trace("free");
        self.inner.free(ptr, size)
    }

    fn set_attrs(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        advice: MemoryAdvice,
    ) -> Result<(), ProviderError> {
        self.trace("set_attrs");
        self.inner.set_attrs(ptr, size, advice)
    }

    fn last_result(&self) -> Option<ProviderError> {
        self.trace("get_last_result");
        self.inner.last_result()
    }

    fn recommended_page_size(&self, size: usize) -> usize {
        self.trace("get_recommended_page_size");
        self.inner.recommended_page_size(size)
    }

    fn min_page_size(&self, ptr: Option<NonNull<u8>>) -> usize {
        self.trace("get_min_page_size");
        self.inner.min_page_size(ptr)
    }

    fn purge_lazy(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ProviderError> {
        self.trace("purge_lazy");
        self.inner.purge_lazy(ptr, size)
    }

    fn purge_force(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ProviderError> {
        self.trace("purge_force");
        self.inner.purge_force(ptr, size)
    }

    fn host_accessible(&self) -> bool {
        self.inner.host_accessible()
    }
}
