// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Buffers wrapping caller-owned USM memory.

use super::{check_region, offset_ptr, AccessMode, HandleKind, MemHandle};
use crate::{Context, MemCopy, UsmError};
use pool_manager::DeviceHandle;
use std::ptr::NonNull;
use std::sync::Arc;

/// A buffer over an existing USM allocation. Every query returns the
/// wrapped pointer; nothing is ever allocated, copied, or freed.
#[derive(Debug)]
pub struct UsmMemHandle {
    context: Arc<Context>,
    size: usize,
    ptr: NonNull<u8>,
}

impl UsmMemHandle {
    /// Wraps `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to `size` bytes of USM memory accessible from every
    /// device of the context and from the host, and must outlive the handle.
    pub unsafe fn new(context: Arc<Context>, ptr: NonNull<u8>, size: usize) -> Self {
        Self { context, size, ptr }
    }
}

// The handle never dereferences `ptr`; the caller guarantees its validity.
unsafe impl Send for UsmMemHandle {}
unsafe impl Sync for UsmMemHandle {}

impl MemHandle for UsmMemHandle {
    fn size(&self) -> usize {
        self.size
    }

    fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Usm
    }

    fn device_ptr(
        &self,
        _device: DeviceHandle,
        _access: AccessMode,
        offset: usize,
        size: usize,
        _copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError> {
        check_region(self.size, offset, size)?;
        Ok(offset_ptr(self.ptr, offset))
    }

    fn map_host_ptr(
        &self,
        _access: AccessMode,
        offset: usize,
        size: usize,
        _copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError> {
        check_region(self.size, offset, size)?;
        Ok(offset_ptr(self.ptr, offset))
    }

    fn unmap_host_ptr(&self, _ptr: NonNull<u8>, _copy: &dyn MemCopy) -> Result<(), UsmError> {
        Ok(())
    }
}
