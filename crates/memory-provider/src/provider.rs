// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`MemoryProvider`] capability trait and its shared vocabulary.

use crate::ProviderError;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Page size reported by providers that have no better answer.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Alignment used when a caller passes `0` ("no preference").
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Shared, type-erased provider. Dropping the last clone destroys it.
pub type ProviderHandle = Arc<dyn MemoryProvider>;

/// The USM memory kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UsmType {
    /// Host memory, accessible by every device in the context.
    Host,
    /// Memory resident on one device.
    Device,
    /// Memory that migrates between the host and one device.
    Shared,
}

impl fmt::Display for UsmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UsmType::Host => "host",
            UsmType::Device => "device",
            UsmType::Shared => "shared",
        };
        f.write_str(name)
    }
}

/// Placement and migration hints accepted by [`MemoryProvider::set_attrs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAdvice {
    /// Clear any earlier advice.
    Default,
    /// The region is mostly read; backends may replicate it.
    ReadMostly,
    /// Undo [`MemoryAdvice::ReadMostly`].
    ClearReadMostly,
    /// Prefer keeping the region in device memory.
    PreferDevice,
    /// Prefer keeping the region in host memory.
    PreferHost,
}

/// A raw allocation backend.
///
/// Implementations must be thread-safe: pools call into one provider from
/// many threads at once.
///
/// # Contract
/// `free` must be called with exactly the `(ptr, size)` pair that `alloc`
/// returned and was asked for. Anything else is undefined behaviour, which
/// is why `free` is `unsafe`. Backends that can detect a mismatch report it
/// as [`ProviderError::InvalidArgument`], but callers must not rely on that.
pub trait MemoryProvider: Send + Sync + fmt::Debug {
    /// Short backend name, e.g. `"null"` or `"system-device"`.
    fn name(&self) -> &str;

    /// Allocates `size` bytes aligned to `alignment` (`0` means
    /// [`DEFAULT_ALIGNMENT`]).
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, ProviderError>;

    /// Returns a region obtained from [`MemoryProvider::alloc`].
    ///
    /// # Safety
    /// `ptr` must come from `alloc` on this provider, must not have been
    /// freed already, and `size` must be the size it was allocated with.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ProviderError>;

    /// Applies a placement hint to `[ptr, ptr + size)`.
    fn set_attrs(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        advice: MemoryAdvice,
    ) -> Result<(), ProviderError>;

    /// The most recent failure reported by this provider, if any.
    fn last_result(&self) -> Option<ProviderError>;

    /// Preferred allocation granularity for requests of `size` bytes.
    fn recommended_page_size(&self, _size: usize) -> usize {
        DEFAULT_PAGE_SIZE
    }

    /// Smallest page size backing `ptr` (or any allocation when `None`).
    fn min_page_size(&self, _ptr: Option<NonNull<u8>>) -> usize {
        DEFAULT_PAGE_SIZE
    }

    /// Hints that the backing pages of the region may be discarded.
    fn purge_lazy(&self, _ptr: NonNull<u8>, _size: usize) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Discards the backing pages of the region immediately.
    fn purge_force(&self, _ptr: NonNull<u8>, _size: usize) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Whether the CPU may read and write memory returned by this provider.
    fn host_accessible(&self) -> bool {
        false
    }
}

/// A provider that can be built through [`create`](crate::create).
pub trait InitProvider: MemoryProvider + Sized + 'static {
    /// Backend-specific construction parameters.
    type Params;

    /// Builds the backend. An error aborts creation.
    fn initialize(params: Self::Params) -> Result<Self, ProviderError>;
}

/// Resolves the `0 == default` alignment convention and validates the rest.
pub(crate) fn effective_alignment(alignment: usize) -> Result<usize, ProviderError> {
    match alignment {
        0 => Ok(DEFAULT_ALIGNMENT),
        a if a.is_power_of_two() => Ok(a.max(std::mem::align_of::<usize>())),
        a => Err(ProviderError::InvalidAlignment(a)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_alignment() {
        assert_eq!(effective_alignment(0).unwrap(), DEFAULT_ALIGNMENT);
        assert_eq!(effective_alignment(4096).unwrap(), 4096);
        assert_eq!(effective_alignment(1).unwrap(), std::mem::align_of::<usize>());
        assert_eq!(effective_alignment(24), Err(ProviderError::InvalidAlignment(24)));
    }

    #[test]
    fn test_usm_type_display() {
        assert_eq!(UsmType::Host.to_string(), "host");
        assert_eq!(UsmType::Device.to_string(), "device");
        assert_eq!(UsmType::Shared.to_string(), "shared");
    }
}
