// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory handles: the storage behind a buffer.
//!
//! | Variant | Storage | Migration |
//! |---|---|---|
//! | [`UsmMemHandle`] | caller's USM pointer | none |
//! | [`IntegratedMemHandle`] | one host allocation | none |
//! | [`DiscreteMemHandle`] | one slot per device + host stagings | on demand |
//!
//! Every call that may move bytes takes a borrowed [`MemCopy`].

mod discrete;
mod integrated;
mod usm;

pub use discrete::DiscreteMemHandle;
pub use integrated::{HostPtrAction, IntegratedMemHandle};
pub use usm::UsmMemHandle;

use crate::{Context, MemCopy, UsmError};
use pool_manager::DeviceHandle;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// How the caller will use a device pointer or host mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
    WriteOnly,
    /// The caller overwrites the whole region; no bytes move either way.
    WriteInvalidate,
}

impl AccessMode {
    /// Whether mapping must bring the current bytes in.
    pub fn copies_in(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadOnly)
    }

    /// Whether unmapping must write the bytes back.
    pub fn copies_out(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

/// Which handle variant backs a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Usm,
    Integrated,
    Discrete,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usm => write!(f, "usm"),
            Self::Integrated => write!(f, "integrated"),
            Self::Discrete => write!(f, "discrete"),
        }
    }
}

/// Storage of a buffer and the coherence operations on it.
pub trait MemHandle: Send + Sync + fmt::Debug {
    /// Buffer size in bytes.
    fn size(&self) -> usize;

    /// Owning context.
    fn context(&self) -> &Arc<Context>;

    fn kind(&self) -> HandleKind;

    /// Pointer to `[offset, offset + size)` usable from `device`.
    fn device_ptr(
        &self,
        device: DeviceHandle,
        access: AccessMode,
        offset: usize,
        size: usize,
        copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError>;

    /// Host pointer to `[offset, offset + size)`.
    fn map_host_ptr(
        &self,
        access: AccessMode,
        offset: usize,
        size: usize,
        copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError>;

    /// Ends a mapping returned by [`map_host_ptr`](Self::map_host_ptr).
    fn unmap_host_ptr(&self, ptr: NonNull<u8>, copy: &dyn MemCopy) -> Result<(), UsmError>;
}

/// Rejects regions that do not fit in a buffer of `buffer_size` bytes.
pub(crate) fn check_region(buffer_size: usize, offset: usize, size: usize) -> Result<(), UsmError> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer_size => Ok(()),
        _ => Err(UsmError::InvalidArgument(format!(
            "region [{offset}, +{size}) exceeds buffer of {buffer_size} bytes"
        ))),
    }
}

/// `base + offset` for a region already checked against the buffer.
pub(crate) fn offset_ptr(base: NonNull<u8>, offset: usize) -> NonNull<u8> {
    // SAFETY: callers check the region, so the result stays inside the
    // (non-null) allocation.
    unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) }
}
