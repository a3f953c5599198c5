// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A provider that succeeds at everything and allocates nothing.

use crate::{InitProvider, MemoryAdvice, MemoryProvider, ProviderError};
use std::ptr::NonNull;

/// No-op backend used to exercise the provider API in isolation.
///
/// `alloc` returns a dangling (never dereferenceable) pointer and `free`
/// accepts anything. It is not host accessible, so pools built on top of it
/// refuse operations that would touch the memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProvider;

impl InitProvider for NullProvider {
    type Params = ();

    fn initialize(_params: ()) -> Result<Self, ProviderError> {
        Ok(NullProvider)
    }
}

impl MemoryProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn alloc(&self, _size: usize, _alignment: usize) -> Result<NonNull<u8>, ProviderError> {
        Ok(NonNull::dangling())
    }

    unsafe fn free(&self, _ptr: NonNull<u8>, _size: usize) -> Result<(), ProviderError> {
        Ok(())
    }

    fn set_attrs(
        &self,
        _ptr: NonNull<u8>,
        _size: usize,
        _advice: MemoryAdvice,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    fn last_result(&self) -> Option<ProviderError> {
        None
    }
}
