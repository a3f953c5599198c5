// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Buffers on devices with their own memory.
//!
//! A discrete buffer owns at most one allocation per device and treats
//! exactly one of them (the active device's) as authoritative once any
//! exists. Host mappings are separate staging allocations.
//!
//! ```text
//!              device_ptr(d)                 map / unmap
//!   Empty ─────────────────► Resident(d) ◄──────────────► Resident(d) + Mapped
//!     │                                        unmap with no active device
//!     └────────────────────────────────────────► Resident(first device)
//! ```
//!
//! # Locking
//! One mutex guards the slots, the active device, and the mappings. It is
//! held for the whole of every call, copies included, so no two coherence
//! operations on a handle ever interleave.

use super::{check_region, offset_ptr, AccessMode, HandleKind, MemHandle};
use crate::platform::DeviceId;
use crate::{Context, MemCopy, UsmAllocation, UsmError};
use memory_provider::UsmType;
use pool_manager::DeviceHandle;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct HostMapping {
    staging: UsmAllocation,
    offset: usize,
    access: AccessMode,
}

#[derive(Debug)]
struct DiscreteState {
    /// Indexed by [`DeviceId`]; each slot is filled at most once.
    device_allocations: Vec<Option<UsmAllocation>>,
    active: Option<DeviceId>,
    mappings: Vec<HostMapping>,
}

impl DiscreteState {
    fn active_ptr(&self) -> Option<NonNull<u8>> {
        let id = self.active?;
        self.device_allocations
            .get(id.0)?
            .as_ref()
            .map(UsmAllocation::as_ptr)
    }
}

/// Discrete buffer storage.
#[derive(Debug)]
pub struct DiscreteMemHandle {
    context: Arc<Context>,
    size: usize,
    state: Mutex<DiscreteState>,
}

impl DiscreteMemHandle {
    /// An empty buffer; no memory is allocated until first use.
    pub fn new(context: Arc<Context>, size: usize) -> Self {
        let slots = context.num_device_slots();
        Self {
            context,
            size,
            state: Mutex::new(DiscreteState {
                device_allocations: std::iter::repeat_with(|| None).take(slots).collect(),
                active: None,
                mappings: Vec::new(),
            }),
        }
    }

    /// A buffer initialized from `data`, resident on the context's first
    /// device.
    pub fn with_host_data(
        context: Arc<Context>,
        data: &[u8],
        copy: &dyn MemCopy,
    ) -> Result<Self, UsmError> {
        let handle = Self::new(context, data.len());
        let first = handle.first_device()?;
        {
            let mut state = handle.lock()?;
            let dst = handle.slot(&mut state, first)?;
            // SAFETY: `dst` is a fresh allocation of `data.len()` bytes.
            unsafe { copy.copy(data.as_ptr(), dst.as_ptr(), data.len())? };
            state.active = Some(first);
        }
        tracing::debug!(size = data.len(), device = %first, "buffer initialized from host data");
        Ok(handle)
    }

    /// Device whose slot is authoritative, if any.
    pub fn active_device(&self) -> Option<DeviceHandle> {
        let state = self.state.lock().ok()?;
        state.active.and_then(|id| self.context.device_handle(id))
    }

    /// Number of live host mappings.
    pub fn num_mappings(&self) -> usize {
        self.state.lock().map(|s| s.mappings.len()).unwrap_or(0)
    }

    /// Number of device slots allocated so far.
    pub fn num_device_allocations(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.device_allocations.iter().flatten().count())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, DiscreteState>, UsmError> {
        self.state
            .lock()
            .map_err(|_| UsmError::InvalidArgument("memory handle lock poisoned".into()))
    }

    fn first_device(&self) -> Result<DeviceId, UsmError> {
        let first = self
            .context
            .devices()
            .first()
            .copied()
            .ok_or_else(|| UsmError::InvalidArgument("context has no devices".into()))?;
        self.context.device_id(first)
    }

    /// Pointer to `device`'s slot, allocating it on first use.
    fn slot(&self, state: &mut DiscreteState, device: DeviceId) -> Result<NonNull<u8>, UsmError> {
        let slot = state
            .device_allocations
            .get_mut(device.0)
            .ok_or_else(|| UsmError::InvalidArgument(format!("device {device} has no slot")))?;
        if let Some(allocation) = slot {
            return Ok(allocation.as_ptr());
        }
        let handle = self
            .context
            .device_handle(device)
            .ok_or_else(|| UsmError::InvalidArgument(format!("unknown device {device}")))?;
        let allocation = self
            .context
            .default_pool()
            .allocate(Some(handle), UsmType::Device, self.size)?;
        let ptr = allocation.as_ptr();
        tracing::debug!(device = %handle, size = self.size, "device slot allocated");
        *slot = Some(allocation);
        Ok(ptr)
    }
}

impl MemHandle for DiscreteMemHandle {
    fn size(&self) -> usize {
        self.size
    }

    fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Discrete
    }

    fn device_ptr(
        &self,
        device: DeviceHandle,
        _access: AccessMode,
        offset: usize,
        size: usize,
        _copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError> {
        check_region(self.size, offset, size)?;
        let id = self.context.device_id(device)?;
        let mut state = self.lock()?;

        let active = match state.active {
            Some(active) => active,
            None => {
                // Fresh buffer: nothing to copy.
                self.slot(&mut state, id)?;
                state.active = Some(id);
                id
            }
        };

        if active == id || self.context.can_access(id, active) {
            let base = state.active_ptr().ok_or_else(|| {
                UsmError::InvalidArgument("active device has no allocation".into())
            })?;
            return Ok(offset_ptr(base, offset));
        }

        let active_handle = self.context.device_handle(active);
        Err(UsmError::UnsupportedFeature(format!(
            "device {device} cannot access buffer resident on {}",
            active_handle.map(|h| h.to_string()).unwrap_or_else(|| active.to_string())
        )))
    }

    fn map_host_ptr(
        &self,
        access: AccessMode,
        offset: usize,
        size: usize,
        copy: &dyn MemCopy,
    ) -> Result<NonNull<u8>, UsmError> {
        check_region(self.size, offset, size)?;
        if size == 0 {
            return Err(UsmError::InvalidArgument("cannot map an empty region".into()));
        }
        let mut state = self.lock()?;

        let staging = self
            .context
            .default_pool()
            .allocate(None, UsmType::Host, size)?;
        let ptr = staging.as_ptr();

        if access.copies_in() {
            if let Some(base) = state.active_ptr() {
                let src = offset_ptr(base, offset);
                // SAFETY: the region is inside the active slot, and the
                // staging allocation holds `size` bytes.
                unsafe { copy.copy(src.as_ptr(), ptr.as_ptr(), size)? };
            }
        }

        state.mappings.push(HostMapping {
            staging,
            offset,
            access,
        });
        tracing::debug!(offset, size, ?access, "host mapping created");
        Ok(ptr)
    }

    fn unmap_host_ptr(&self, ptr: NonNull<u8>, copy: &dyn MemCopy) -> Result<(), UsmError> {
        let mut state = self.lock()?;
        let index = state
            .mappings
            .iter()
            .position(|m| m.staging.as_ptr() == ptr)
            .ok_or_else(|| {
                UsmError::InvalidArgument(format!("{ptr:?} is not a live host mapping"))
            })?;

        let (offset, access, size) = {
            let m = &state.mappings[index];
            (m.offset, m.access, m.staging.size())
        };

        if access.copies_out() {
            let active = match state.active {
                Some(active) => active,
                None => {
                    let first = self.first_device()?;
                    self.slot(&mut state, first)?;
                    state.active = Some(first);
                    first
                }
            };
            let base = state.active_ptr().ok_or_else(|| {
                UsmError::InvalidArgument(format!("active device {active} has no allocation"))
            })?;
            let dst = offset_ptr(base, offset);
            // SAFETY: the staging buffer holds `size` bytes and the region
            // was checked against the buffer when mapped.
            unsafe { copy.copy(ptr.as_ptr(), dst.as_ptr(), size)? };
        }

        state.mappings.swap_remove(index);
        tracing::debug!(offset, size, ?access, "host mapping released");
        Ok(())
    }
}
