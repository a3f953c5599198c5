// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Buffers on devices that share physical memory with the host.
//!
//! One host allocation serves every access, so device pointers and host
//! mappings are the same memory and nothing ever migrates.

use super::{check_region, offset_ptr, AccessMode, HandleKind, MemHandle};
use crate::{Context, MemCopy, UsmAllocation, UsmError};
use memory_provider::UsmType;
use pool_manager::DeviceHandle;
use std::ptr::NonNull;
use std::sync::Arc;

/// What to do with a caller-supplied host pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPtrAction {
    /// Use the caller's memory directly if the platform can import it.
    Import,
    /// Copy the caller's bytes into a pool allocation.
    Copy,
}

#[derive(Debug)]
enum Storage {
    Imported(NonNull<u8>),
    Owned(UsmAllocation),
}

/// Integrated buffer storage.
#[derive(Debug)]
pub struct IntegratedMemHandle {
    context: Arc<Context>,
    size: usize,
    storage: Storage,
}

impl IntegratedMemHandle {
    /// Creates the storage, importing or copying `host_ptr` if given.
    ///
    /// Import falls back to allocate-and-copy when the platform cannot
    /// import host memory.
    ///
    /// # Safety
    /// If given, `host_ptr` must be readable for `size` bytes. With
    /// [`HostPtrAction::Import`] it must also stay valid, and not be
    /// accessed except through this handle, for the handle's lifetime.
    pub unsafe fn new(
        context: Arc<Context>,
        host_ptr: Option<NonNull<u8>>,
        size: usize,
        action: HostPtrAction,
    ) -> Result<Self, UsmError> {
        if let (Some(ptr), HostPtrAction::Import) = (host_ptr, action) {
            if context.platform().supports_host_import() {
                tracing::debug!(size, "host pointer imported");
                return Ok(Self {
                    context,
                    size,
                    storage: Storage::Imported(ptr),
                });
            }
        }

        let allocation = context.default_pool().allocate(None, UsmType::Host, size)?;
        if let Some(src) = host_ptr {
            std::ptr::copy_nonoverlapping(src.as_ptr(), allocation.as_ptr().as_ptr(), size);
        }
        Ok(Self {
            context,
            size,
            storage: Storage::Owned(allocation),
        })
    }

    /// Whether the caller's memory is used directly.
    pub fn is_imported(&self) -> bool {
        matches!(self.storage, Storage::Imported(_))
    }

    fn base(&self) -> NonNull<u8> {
        match &self.storage {
            Storage::Imported(ptr) => *ptr,
            Storage::Owned(allocation) => allocation.as_ptr(),
        }
    }
}

// Imported memory is owned by this handle for its lifetime (see `new`).
unsafe impl Send for IntegratedMemHandle {}
unsafe impl Sync for IntegratedMemHandle {}

impl MemHandle for IntegratedMemHandle {
    fn size(&self) -> usize {
        self.size
    }

    fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Integrated
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
        Ok(offset_ptr(self.base(), offset))
    }

    fn map_host_ptr(
        &self,
        _access: AccessMode,
        offset: usize,
        size: usize,
        _copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError> {
        check_region(self.size, offset, size)?;
        Ok(offset_ptr(self.base(), offset))
    }

    fn unmap_host_ptr(&self, _ptr: NonNull<u8>, _copy: &dyn MemCopy) -> Result<(), UsmError> {
        Ok(())
    }
}
