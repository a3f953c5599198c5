// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Heap-backed provider for host, device, and shared memory.
//!
//! Devices in this runtime are host-emulated: their "device memory" is
//! ordinary process memory obtained through [`std::alloc`]. The provider
//! still behaves like a device allocator in every way the layers above can
//! observe. It tracks live allocations, enforces an optional capacity,
//! and rejects frees and hints for pointers it never handed out.

use crate::provider::effective_alignment;
use crate::{InitProvider, MemoryAdvice, MemoryProvider, ProviderError, UsmType};
use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

/// Construction parameters for [`SystemProvider`].
#[derive(Debug, Clone)]
pub struct SystemProviderParams {
    /// Memory kind served by this provider.
    pub kind: UsmType,
    /// Native identity of the owning device (`None` for host memory).
    pub device: Option<u64>,
    /// Maximum live bytes, or `None` for unlimited.
    pub capacity: Option<usize>,
}

impl SystemProviderParams {
    /// Unlimited provider for `kind` with no owning device.
    pub fn new(kind: UsmType) -> Self {
        Self {
            kind,
            device: None,
            capacity: None,
        }
    }

    /// Sets the owning device.
    pub fn with_device(mut self, native: u64) -> Self {
        self.device = Some(native);
        self
    }

    /// Caps live bytes at `capacity`.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

#[derive(Debug)]
struct LiveAllocation {
    layout: Layout,
    advice: MemoryAdvice,
}

#[derive(Debug, Default)]
struct SystemState {
    live: HashMap<usize, LiveAllocation>,
    allocated_bytes: usize,
}

/// The default backend: process-heap memory labelled with a USM kind.
#[derive(Debug)]
pub struct SystemProvider {
    name: String,
    params: SystemProviderParams,
    state: Mutex<SystemState>,
    last_error: Mutex<Option<ProviderError>>,
}

impl SystemProvider {
    /// Creates a provider. Rejects a zero capacity.
    pub fn new(params: SystemProviderParams) -> Result<Self, ProviderError> {
        if params.capacity == Some(0) {
            return Err(ProviderError::Initialization(
                "capacity must be non-zero".into(),
            ));
        }
        let name = match params.device {
            Some(native) => format!("system-{}[{native:#x}]", params.kind),
            None => format!("system-{}", params.kind),
        };
        Ok(Self {
            name,
            params,
            state: Mutex::new(SystemState::default()),
            last_error: Mutex::new(None),
        })
    }

    /// Memory kind served by this provider.
    pub fn kind(&self) -> UsmType {
        self.params.kind
    }

    /// Bytes currently handed out.
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().map(|s| s.allocated_bytes).unwrap_or(0)
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().map(|s| s.live.len()).unwrap_or(0)
    }

    /// Last advice applied to the allocation starting at `ptr`.
    pub fn advice(&self, ptr: NonNull<u8>) -> Option<MemoryAdvice> {
        let state = self.state.lock().ok()?;
        state.live.get(&(ptr.as_ptr() as usize)).map(|a| a.advice)
    }

    fn record<T>(&self, result: Result<T, ProviderError>) -> Result<T, ProviderError> {
        if let Err(e) = &result {
            if let Ok(mut last) = self.last_error.lock() {
                *last = Some(e.clone());
            }
        }
        result
    }

    fn poisoned() -> ProviderError {
        ProviderError::Specific("provider state lock poisoned".into())
    }

    fn try_alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, ProviderError> {
        if size == 0 {
            return Err(ProviderError::InvalidArgument(
                "cannot allocate zero bytes".into(),
            ));
        }
        let align = effective_alignment(alignment)?;
        let layout = Layout::from_size_align(size, align)
            .map_err(|e| ProviderError::InvalidArgument(format!("bad layout: {e}")))?;

        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;
        if let Some(capacity) = self.params.capacity {
            let available = capacity.saturating_sub(state.allocated_bytes);
            if size > available {
                return Err(ProviderError::OutOfMemory {
                    requested: size,
                    available,
                });
            }
        }

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(ProviderError::OutOfMemory {
            requested: size,
            available: 0,
        })?;

        state.allocated_bytes += size;
        state.live.insert(
            raw as usize,
            LiveAllocation {
                layout,
                advice: MemoryAdvice::Default,
            },
        );
        Ok(ptr)
    }

    fn try_free(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ProviderError> {
        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;
        let addr = ptr.as_ptr() as usize;
        let layout = match state.live.get(&addr) {
            Some(a) if size == 0 || size == a.layout.size() => a.layout,
            Some(a) => {
                return Err(ProviderError::InvalidArgument(format!(
                    "free of {addr:#x} with size {size}, allocated with {}",
                    a.layout.size()
                )))
            }
            None => {
                return Err(ProviderError::InvalidArgument(format!(
                    "free of unknown pointer {addr:#x}"
                )))
            }
        };
        state.live.remove(&addr);
        state.allocated_bytes -= layout.size();
        // SAFETY: `ptr` was returned by `std::alloc::alloc` with `layout`
        // and was still live until the removal above.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn try_set_attrs(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        advice: MemoryAdvice,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;
        let addr = ptr.as_ptr() as usize;
        let alloc = state.live.get_mut(&addr).ok_or_else(|| {
            ProviderError::InvalidArgument(format!("advice for unknown pointer {addr:#x}"))
        })?;
        if size > alloc.layout.size() {
            return Err(ProviderError::InvalidArgument(format!(
                "advice range of {size} bytes exceeds allocation of {}",
                alloc.layout.size()
            )));
        }
        alloc.advice = advice;
        Ok(())
    }
}

impl InitProvider for SystemProvider {
    type Params = SystemProviderParams;

    fn initialize(params: SystemProviderParams) -> Result<Self, ProviderError> {
        Self::new(params)
    }
}

impl MemoryProvider for SystemProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, ProviderError> {
        self.record(self.try_alloc(size, alignment))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ProviderError> {
        self.record(self.try_free(ptr, size))
    }

    fn set_attrs(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        advice: MemoryAdvice,
    ) -> Result<(), ProviderError> {
        self.record(self.try_set_attrs(ptr, size, advice))
    }

    fn last_result(&self) -> Option<ProviderError> {
        self.last_error.lock().ok().and_then(|l| l.clone())
    }

    fn recommended_page_size(&self, size: usize) -> usize {
        // Large shared allocations migrate in 2 MiB units.
        if self.params.kind == UsmType::Shared && size >= 2 * 1024 * 1024 {
            2 * 1024 * 1024
        } else {
            crate::DEFAULT_PAGE_SIZE
        }
    }

    fn host_accessible(&self) -> bool {
        true
    }
}

impl Drop for SystemProvider {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.live.is_empty() {
            tracing::warn!(
                provider = %self.name,
                leaked = state.live.len(),
                bytes = state.allocated_bytes,
                "provider destroyed with live allocations; releasing them"
            );
        }
        for (addr, alloc) in state.live.drain() {
            // SAFETY: every entry in `live` is an outstanding allocation made
            // with exactly this layout.
            unsafe { std::alloc::dealloc(addr as *mut u8, alloc.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create;

    fn host() -> SystemProvider {
        SystemProvider::new(SystemProviderParams::new(UsmType::Host)).unwrap()
    }

    #[test]
    fn test_alloc_free() {
        let p = host();
        let ptr = p.alloc(1000, 0).unwrap();
        assert_eq!(p.allocated_bytes(), 1000);
        assert_eq!(p.live_allocations(), 1);
        unsafe { p.free(ptr, 1000).unwrap() };
        assert_eq!(p.allocated_bytes(), 0);
        assert_eq!(p.live_allocations(), 0);
    }

    #[test]
    fn test_alignment_honoured() {
        let p = host();
        let ptr = p.alloc(100, 4096).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 4096, 0);
        unsafe { p.free(ptr, 100).unwrap() };
    }

    #[test]
    fn test_bad_alignment() {
        let p = host();
        assert_eq!(p.alloc(64, 3), Err(ProviderError::InvalidAlignment(3)));
        assert_eq!(p.last_result(), Some(ProviderError::InvalidAlignment(3)));
    }

    #[test]
    fn test_capacity_exhaustion() {
        let p = SystemProvider::new(
            SystemProviderParams::new(UsmType::Device)
                .with_device(0x10)
                .with_capacity(1024),
        )
        .unwrap();
        let a = p.alloc(768, 0).unwrap();
        let err = p.alloc(512, 0).unwrap_err();
        assert_eq!(
            err,
            ProviderError::OutOfMemory {
                requested: 512,
                available: 256
            }
        );
        assert!(matches!(p.last_result(), Some(ProviderError::OutOfMemory { .. })));
        unsafe { p.free(a, 768).unwrap() };
        assert!(p.alloc(1024, 0).is_ok());
    }

    #[test]
    fn test_free_rejects_unknown_pointer_and_wrong_size() {
        let p = host();
        let ptr = p.alloc(128, 0).unwrap();
        let err = unsafe { p.free(ptr, 64) }.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument(_)));
        assert_eq!(p.live_allocations(), 1);
        unsafe { p.free(ptr, 128).unwrap() };
        let err = unsafe { p.free(ptr, 128) }.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument(_)));
    }

    #[test]
    fn test_set_attrs_records_advice() {
        let p = host();
        let ptr = p.alloc(256, 0).unwrap();
        p.set_attrs(ptr, 256, MemoryAdvice::ReadMostly).unwrap();
        assert_eq!(p.advice(ptr), Some(MemoryAdvice::ReadMostly));
        assert!(p.set_attrs(ptr, 512, MemoryAdvice::PreferHost).is_err());
        unsafe { p.free(ptr, 256).unwrap() };
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(host().alloc(0, 0).is_err());
    }

    #[test]
    fn test_zero_capacity_fails_initialization() {
        let err = create::<SystemProvider>(
            SystemProviderParams::new(UsmType::Device).with_capacity(0),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Initialization(_)));
    }

    #[test]
    fn test_name_includes_kind_and_device() {
        let p = SystemProvider::new(SystemProviderParams::new(UsmType::Device).with_device(0xab))
            .unwrap();
        assert_eq!(p.name(), "system-device[0xab]");
        assert_eq!(host().name(), "system-host");
    }

    #[test]
    fn test_drop_releases_leaks() {
        let p = host();
        p.alloc(64, 0).unwrap();
        drop(p);
    }
}
