// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference-counted buffers.
//!
//! A [`Buffer`] picks its storage when created: integrated contexts get an
//! [`IntegratedMemHandle`], everything else a [`DiscreteMemHandle`].
//! [`Buffer::retain`] hands out another reference; when the last one is
//! released every device slot and host staging the handle owns is freed
//! before `release` returns.

use crate::handle::{
    AccessMode, DiscreteMemHandle, HandleKind, HostPtrAction, IntegratedMemHandle, MemHandle,
    UsmMemHandle,
};
use crate::{Context, HostCopy, MemCopy, UsmError};
use pool_manager::{ContextHandle, DeviceHandle};
use std::ptr::NonNull;
use std::sync::Arc;

/// Properties reported by [`Buffer::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub context: ContextHandle,
    pub size: usize,
}

/// A buffer and its storage.
#[derive(Debug)]
pub struct Buffer {
    handle: Arc<Box<dyn MemHandle>>,
}

impl Buffer {
    /// An uninitialized buffer of `size` bytes.
    pub fn new(context: &Arc<Context>, size: usize) -> Result<Self, UsmError> {
        check_size(size)?;
        let handle: Box<dyn MemHandle> = if context.is_integrated() {
            // SAFETY: no host pointer is passed.
            Box::new(unsafe {
                IntegratedMemHandle::new(Arc::clone(context), None, size, HostPtrAction::Copy)?
            })
        } else {
            Box::new(DiscreteMemHandle::new(Arc::clone(context), size))
        };
        Ok(Self::from_handle(handle))
    }

    /// A buffer initialized with a copy of `data`.
    pub fn from_slice(context: &Arc<Context>, data: &[u8]) -> Result<Self, UsmError> {
        check_size(data.len())?;
        let handle: Box<dyn MemHandle> = if context.is_integrated() {
            // SAFETY: `data` is readable for its length and is only copied.
            Box::new(unsafe {
                IntegratedMemHandle::new(
                    Arc::clone(context),
                    NonNull::new(data.as_ptr() as *mut u8),
                    data.len(),
                    HostPtrAction::Copy,
                )?
            })
        } else {
            Box::new(DiscreteMemHandle::with_host_data(
                Arc::clone(context),
                data,
                &HostCopy,
            )?)
        };
        Ok(Self::from_handle(handle))
    }

    /// A buffer using `host_ptr` as its storage where the context allows it,
    /// and initialized from it otherwise.
    ///
    /// # Safety
    /// `host_ptr` must be valid for reads and writes of `size` bytes for the
    /// lifetime of the buffer and must not be accessed except through it.
    pub unsafe fn use_host_ptr(
        context: &Arc<Context>,
        host_ptr: NonNull<u8>,
        size: usize,
    ) -> Result<Self, UsmError> {
        check_size(size)?;
        let handle: Box<dyn MemHandle> = if context.is_integrated() {
            Box::new(IntegratedMemHandle::new(
                Arc::clone(context),
                Some(host_ptr),
                size,
                HostPtrAction::Import,
            )?)
        } else {
            let data = std::slice::from_raw_parts(host_ptr.as_ptr(), size);
            Box::new(DiscreteMemHandle::with_host_data(
                Arc::clone(context),
                data,
                &HostCopy,
            )?)
        };
        Ok(Self::from_handle(handle))
    }

    /// A buffer over existing USM memory.
    ///
    /// # Safety
    /// See [`UsmMemHandle::new`].
    pub unsafe fn from_usm(
        context: &Arc<Context>,
        ptr: NonNull<u8>,
        size: usize,
    ) -> Result<Self, UsmError> {
        check_size(size)?;
        Ok(Self::from_handle(Box::new(UsmMemHandle::new(
            Arc::clone(context),
            ptr,
            size,
        ))))
    }

    /// Wraps an existing handle.
    pub fn from_handle(handle: Box<dyn MemHandle>) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Another reference to the same storage.
    pub fn retain(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
        }
    }

    /// Drops this reference. Returns `true` if it was the last one, in
    /// which case all storage has been freed.
    ///
    /// Exactly one of several concurrent releases of the last references
    /// observes `true`.
    pub fn release(self) -> bool {
        Arc::into_inner(self.handle).is_some()
    }

    /// Number of live references.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.handle)
    }

    pub fn size(&self) -> usize {
        self.handle.size()
    }

    pub fn context(&self) -> &Arc<Context> {
        self.handle.context()
    }

    pub fn kind(&self) -> HandleKind {
        self.handle.kind()
    }

    pub fn info(&self) -> MemInfo {
        MemInfo {
            context: self.context().handle(),
            size: self.size(),
        }
    }

    /// The storage behind the buffer.
    pub fn handle(&self) -> &dyn MemHandle {
        self.handle.as_ref().as_ref()
    }

    /// See [`MemHandle::device_ptr`].
    pub fn device_ptr(
        &self,
        device: DeviceHandle,
        access: AccessMode,
        offset: usize,
        size: usize,
        copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError> {
        self.handle.device_ptr(device, access, offset, size, copy)
    }

    /// See [`MemHandle::map_host_ptr`].
    pub fn map_host_ptr(
        &self,
        access: AccessMode,
        offset: usize,
        size: usize,
        copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError> {
        self.handle.map_host_ptr(access, offset, size, copy)
    }

    /// See [`MemHandle::unmap_host_ptr`].
    pub fn unmap_host_ptr(&self, ptr: NonNull<u8>, copy: &dyn MemCopy) -> Result<(), UsmError> {
        self.handle.unmap_host_ptr(ptr, copy)
    }
}

fn check_size(size: usize) -> Result<(), UsmError> {
    if size == 0 {
        return Err(UsmError::InvalidArgument("buffer size must be non-zero".into()));
    }
    Ok(())
}
