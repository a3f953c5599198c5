// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-emulated device platform.
//!
//! Devices are described up front with [`DeviceSpec`] and discovered once
//! when the platform is built. Discovery walks every root device and its
//! sub-devices with a worklist and hands out small-integer [`DeviceId`]s in
//! that order; per-device arrays elsewhere are indexed by them.
//!
//! ```text
//! gpu0 (id 0) ─┬─ gpu0.0 (id 1)
//!              └─ gpu0.1 (id 2)
//! gpu1 (id 3)
//! ```

use crate::UsmError;
use pool_manager::{ContextHandle, DeviceHandle, NativeHandle, StaticTopology};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

const DEVICE_HANDLE_BASE: u64 = 0x1000;
const NATIVE_HANDLE_BASE: u64 = 0xd000;

/// Index of a device in its platform, assigned at discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Description of a device to emulate.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    name: String,
    integrated: bool,
    aliases_parent: bool,
    children: Vec<DeviceSpec>,
}

impl DeviceSpec {
    /// A device with its own memory.
    pub fn discrete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            integrated: false,
            aliases_parent: false,
            children: Vec::new(),
        }
    }

    /// A device sharing physical memory with the host.
    pub fn integrated(name: impl Into<String>) -> Self {
        Self {
            integrated: true,
            ..Self::discrete(name)
        }
    }

    /// Splits the device into `count` equal sub-devices named `name.N`.
    ///
    /// A single partition covers the whole device and so has the same
    /// native identity as its parent.
    pub fn partition(mut self, count: usize) -> Self {
        for i in 0..count {
            let mut child = Self::discrete(format!("{}.{i}", self.name));
            child.integrated = self.integrated;
            child.aliases_parent = count == 1;
            self.children.push(child);
        }
        self
    }

    /// Adds an explicitly described sub-device.
    pub fn sub_device(mut self, child: DeviceSpec) -> Self {
        self.children.push(child);
        self
    }
}

/// A discovered device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub handle: DeviceHandle,
    pub native: NativeHandle,
    pub name: String,
    pub integrated: bool,
    /// `None` for root devices.
    pub parent: Option<DeviceId>,
    pub root: DeviceId,
    pub sub_devices: Vec<DeviceId>,
}

/// Builder for a [`Platform`].
#[derive(Debug, Default)]
pub struct PlatformBuilder {
    roots: Vec<DeviceSpec>,
    peers: Vec<(String, String)>,
    host_import: bool,
}

impl PlatformBuilder {
    /// Adds a root device.
    pub fn device(mut self, spec: DeviceSpec) -> Self {
        self.roots.push(spec);
        self
    }

    /// Lets the two named devices address each other's memory.
    pub fn peer_access(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.peers.push((a.into(), b.into()));
        self
    }

    /// Whether caller-owned host memory can be imported zero-copy.
    pub fn host_import(mut self, enabled: bool) -> Self {
        self.host_import = enabled;
        self
    }

    /// Discovers every device and assigns ids.
    pub fn build(self) -> Result<Arc<Platform>, UsmError> {
        let mut devices: Vec<DeviceInfo> = Vec::new();
        let mut names = HashSet::new();
        let mut next_native = NATIVE_HANDLE_BASE;

        // (spec, parent id)
        let mut worklist: Vec<(DeviceSpec, Option<DeviceId>)> =
            self.roots.into_iter().rev().map(|spec| (spec, None)).collect();

        while let Some((spec, parent)) = worklist.pop() {
            if !names.insert(spec.name.clone()) {
                return Err(UsmError::ConfigError(format!(
                    "duplicate device name '{}'",
                    spec.name
                )));
            }
            let id = DeviceId(devices.len());
            let native = match parent {
                Some(p) if spec.aliases_parent => devices[p.0].native,
                _ => {
                    next_native += 1;
                    NativeHandle(next_native)
                }
            };
            let root = parent.map(|p| devices[p.0].root).unwrap_or(id);
            if let Some(p) = parent {
                devices[p.0].sub_devices.push(id);
            }
            devices.push(DeviceInfo {
                id,
                handle: DeviceHandle(DEVICE_HANDLE_BASE + id.0 as u64),
                native,
                name: spec.name,
                integrated: spec.integrated,
                parent,
                root,
                sub_devices: Vec::new(),
            });
            worklist.extend(spec.children.into_iter().rev().map(|c| (c, Some(id))));
        }

        let n = devices.len();
        let mut peers = vec![vec![false; n]; n];
        for a in &devices {
            for b in &devices {
                peers[a.id.0][b.id.0] = a.root == b.root;
            }
        }
        for (a, b) in &self.peers {
            let a = find_by_name(&devices, a)?;
            let b = find_by_name(&devices, b)?;
            // Peer access extends to every sub-device of both roots.
            let (ra, rb) = (devices[a.0].root, devices[b.0].root);
            for x in devices.iter().filter(|d| d.root == ra) {
                for y in devices.iter().filter(|d| d.root == rb) {
                    peers[x.id.0][y.id.0] = true;
                    peers[y.id.0][x.id.0] = true;
                }
            }
        }

        tracing::info!(
            devices = n,
            roots = devices.iter().filter(|d| d.parent.is_none()).count(),
            host_import = self.host_import,
            "platform discovered"
        );

        Ok(Arc::new(Platform {
            devices,
            peers,
            host_import: self.host_import,
        }))
    }
}

fn find_by_name(devices: &[DeviceInfo], name: &str) -> Result<DeviceId, UsmError> {
    devices
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.id)
        .ok_or_else(|| UsmError::InvalidArgument(format!("unknown device '{name}'")))
}

/// Every device the runtime can see.
#[derive(Debug)]
pub struct Platform {
    devices: Vec<DeviceInfo>,
    peers: Vec<Vec<bool>>,
    host_import: bool,
}

impl Platform {
    /// Starts describing a platform.
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    /// All devices, indexed by [`DeviceId`].
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Root devices only.
    pub fn root_devices(&self) -> Vec<DeviceHandle> {
        self.devices
            .iter()
            .filter(|d| d.parent.is_none())
            .map(|d| d.handle)
            .collect()
    }

    /// Number of devices, including sub-devices.
    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, handle: DeviceHandle) -> Option<&DeviceInfo> {
        let index = handle.0.checked_sub(DEVICE_HANDLE_BASE)? as usize;
        self.devices.get(index).filter(|d| d.handle == handle)
    }

    pub fn device_by_name(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Whether `from` can directly address memory resident on `to`.
    pub fn can_access_peer(&self, from: DeviceId, to: DeviceId) -> bool {
        self.peers
            .get(from.0)
            .and_then(|row| row.get(to.0))
            .copied()
            .unwrap_or(false)
    }

    /// Whether caller-owned host memory can be imported zero-copy.
    pub fn supports_host_import(&self) -> bool {
        self.host_import
    }

    /// Topology of a context owning `devices` and everything below them.
    pub(crate) fn topology_for(
        &self,
        context: ContextHandle,
        devices: &[DeviceHandle],
    ) -> Result<StaticTopology, UsmError> {
        let mut topology = StaticTopology::new();
        let mut worklist = Vec::new();
        for &handle in devices {
            let info = self.device(handle).ok_or_else(|| {
                UsmError::InvalidArgument(format!("device {handle} is not on this platform"))
            })?;
            topology.add_device(context, info.handle, info.native);
            worklist.push(info.id);
        }
        while let Some(id) = worklist.pop() {
            let parent = &self.devices[id.0];
            for &child in &parent.sub_devices {
                let info = &self.devices[child.0];
                if topology.contains(info.handle) {
                    continue;
                }
                topology.add_sub_device(parent.handle, info.handle, info.native)?;
                worklist.push(child);
            }
        }
        Ok(topology)
    }
}
