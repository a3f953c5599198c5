// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Contexts: a set of devices sharing a default USM pool.

use crate::platform::{DeviceId, Platform};
use crate::{UsmConfig, UsmError, UsmPool};
use pool_manager::{ContextHandle, DeviceHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Devices of one context and the pools serving them.
#[derive(Debug)]
pub struct Context {
    handle: ContextHandle,
    platform: Arc<Platform>,
    devices: Vec<DeviceHandle>,
    /// Membership of every platform device, indexed by [`DeviceId`].
    members: Vec<bool>,
    /// Peers of each device, indexed by [`DeviceId`]. Empty for devices
    /// outside the context.
    p2p: Vec<Vec<DeviceHandle>>,
    default_pool: UsmPool,
}

impl Context {
    /// Creates a context over `devices` (and their sub-devices).
    pub fn new(
        platform: &Arc<Platform>,
        devices: &[DeviceHandle],
        config: &UsmConfig,
    ) -> Result<Arc<Self>, UsmError> {
        if devices.is_empty() {
            return Err(UsmError::InvalidArgument(
                "a context needs at least one device".into(),
            ));
        }
        let handle = ContextHandle(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
        let topology = platform.topology_for(handle, devices)?;

        let members: Vec<DeviceId> = platform
            .devices()
            .iter()
            .filter(|d| topology.contains(d.handle))
            .map(|d| d.id)
            .collect();
        let mut membership = vec![false; platform.num_devices()];
        for id in &members {
            membership[id.0] = true;
        }
        let mut p2p = vec![Vec::new(); platform.num_devices()];
        for &a in &members {
            p2p[a.0] = members
                .iter()
                .filter(|&&b| b != a && platform.can_access_peer(a, b))
                .map(|b| platform.devices()[b.0].handle)
                .collect();
        }

        let default_pool = UsmPool::new(handle, Arc::new(topology), config)?;
        tracing::info!(
            context = %handle,
            devices = devices.len(),
            with_sub_devices = members.len(),
            "context created"
        );

        Ok(Arc::new(Self {
            handle,
            platform: Arc::clone(platform),
            devices: devices.to_vec(),
            members: membership,
            p2p,
            default_pool,
        }))
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    /// Devices the context was created with.
    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    /// Whether buffers should live in host memory: exactly one device, and
    /// it shares physical memory with the host.
    pub fn is_integrated(&self) -> bool {
        match self.devices.as_slice() {
            [only] => self.platform.device(*only).is_some_and(|d| d.integrated),
            _ => false,
        }
    }

    /// Small-integer id of `device`, if it belongs to this context.
    pub fn device_id(&self, device: DeviceHandle) -> Result<DeviceId, UsmError> {
        let info = self.platform.device(device).ok_or_else(|| {
            UsmError::InvalidArgument(format!("unknown device {device}"))
        })?;
        if self.members.get(info.id.0).copied().unwrap_or(false) {
            Ok(info.id)
        } else {
            Err(UsmError::InvalidArgument(format!(
                "device {device} is not part of context {}",
                self.handle
            )))
        }
    }

    /// Handle of the device with id `id`.
    pub fn device_handle(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.platform.devices().get(id.0).map(|d| d.handle)
    }

    /// Devices whose memory `device` can address directly.
    pub fn p2p_devices(&self, device: DeviceHandle) -> Result<&[DeviceHandle], UsmError> {
        let id = self.device_id(device)?;
        Ok(&self.p2p[id.0])
    }

    /// Whether `from` can address memory resident on `to`.
    pub fn can_access(&self, from: DeviceId, to: DeviceId) -> bool {
        from == to
            || self.device_handle(to).is_some_and(|to| {
                self.p2p
                    .get(from.0)
                    .is_some_and(|peers| peers.contains(&to))
            })
    }

    /// Length of per-device arrays.
    pub fn num_device_slots(&self) -> usize {
        self.platform.num_devices()
    }

    pub fn default_pool(&self) -> &UsmPool {
        &self.default_pool
    }
}
