// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The synchronous byte-copy primitive lent to migration calls.

use crate::UsmError;

/// Copies bytes between two allocations, blocking until the destination
/// holds them.
pub trait MemCopy {
    /// Copies `len` bytes from `src` to `dst`.
    ///
    /// # Safety
    /// `src` must be readable and `dst` writable for `len` bytes, and the
    /// two ranges must not overlap.
    unsafe fn copy(&self, src: *const u8, dst: *mut u8, len: usize) -> Result<(), UsmError>;
}

/// Copies with the CPU. Every emulated device is host addressable.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCopy;

impl MemCopy for HostCopy {
    unsafe fn copy(&self, src: *const u8, dst: *mut u8, len: usize) -> Result<(), UsmError> {
        std::ptr::copy_nonoverlapping(src, dst, len);
        Ok(())
    }
}

impl<F> MemCopy for F
where
    F: Fn(*const u8, *mut u8, usize) -> Result<(), UsmError>,
{
    unsafe fn copy(&self, src: *const u8, dst: *mut u8, len: usize) -> Result<(), UsmError> {
        self(src, dst, len)
    }
}
