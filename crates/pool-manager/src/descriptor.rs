// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool descriptors: the logical key of one pool instance.
//!
//! A descriptor names the owning pool handle, the context, the device (for
//! device and shared memory), the memory kind, and for shared memory
//! whether the device only reads it. Equality and hashing go through the
//! device's native identity, so a parent device and a sub-device that
//! resolve to the same physical device share a pool.

use crate::device::enumerate_devices;
use crate::{ContextHandle, DeviceError, DeviceHandle, DeviceTopology, NativeHandle, PoolHandle};
use memory_provider::UsmType;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Logical key of a pool.
///
/// There is no `==`: the logical device handle is not the identity of a
/// pool. Compare with [`equals`](Self::equals) or through [`PoolKey`].
///
/// ```compile_fail
/// use pool_manager::{ContextHandle, PoolDescriptor, PoolHandle};
///
/// let a = PoolDescriptor::host(PoolHandle(1), ContextHandle(1));
/// let b = PoolDescriptor::host(PoolHandle(1), ContextHandle(1));
/// let _ = a == b;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PoolDescriptor {
    pub pool: PoolHandle,
    pub context: ContextHandle,
    /// `None` for host memory.
    pub device: Option<DeviceHandle>,
    pub kind: UsmType,
    /// Meaningful only for [`UsmType::Shared`].
    pub device_read_only: bool,
}

/// A descriptor with its device resolved to native identity.
///
/// This is what equality and hashing are defined over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub pool: PoolHandle,
    pub native: Option<NativeHandle>,
    pub kind: UsmType,
    pub read_only: bool,
}

impl PoolDescriptor {
    /// Descriptor for host memory.
    pub fn host(pool: PoolHandle, context: ContextHandle) -> Self {
        Self {
            pool,
            context,
            device: None,
            kind: UsmType::Host,
            device_read_only: false,
        }
    }

    /// Descriptor for memory of `kind` on `device`.
    pub fn for_device(
        pool: PoolHandle,
        context: ContextHandle,
        device: DeviceHandle,
        kind: UsmType,
        device_read_only: bool,
    ) -> Self {
        Self {
            pool,
            context,
            device: Some(device),
            kind,
            device_read_only,
        }
    }

    /// Every descriptor of a context: one host descriptor, then for every
    /// device and sub-device one device descriptor and two shared ones
    /// (read-write, read-only).
    pub fn create(
        pool: PoolHandle,
        context: ContextHandle,
        topology: &dyn DeviceTopology,
    ) -> Result<Vec<PoolDescriptor>, DeviceError> {
        let devices = enumerate_devices(topology, context)?;
        let mut descriptors = Vec::with_capacity(1 + 3 * devices.len());
        descriptors.push(Self::host(pool, context));
        for device in devices {
            descriptors.push(Self::for_device(pool, context, device, UsmType::Device, false));
            descriptors.push(Self::for_device(pool, context, device, UsmType::Shared, false));
            descriptors.push(Self::for_device(pool, context, device, UsmType::Shared, true));
        }
        Ok(descriptors)
    }

    /// Resolves the device to its native identity.
    pub fn resolve(&self, topology: &dyn DeviceTopology) -> Result<PoolKey, DeviceError> {
        let native = match (self.kind, self.device) {
            (UsmType::Host, _) | (_, None) => None,
            (_, Some(device)) => Some(topology.native_handle(device)?),
        };
        Ok(PoolKey {
            pool: self.pool,
            native,
            kind: self.kind,
            read_only: self.kind == UsmType::Shared && self.device_read_only,
        })
    }

    /// Compares two descriptors by native identity.
    ///
    /// Fails if either device cannot be resolved.
    pub fn equals(
        &self,
        other: &PoolDescriptor,
        topology: &dyn DeviceTopology,
    ) -> Result<bool, DeviceError> {
        Ok(self.resolve(topology)? == other.resolve(topology)?)
    }

    /// Hash consistent with [`equals`](Self::equals).
    pub fn hash_key(&self, topology: &dyn DeviceTopology) -> Result<u64, DeviceError> {
        let mut hasher = DefaultHasher::new();
        self.resolve(topology)?.hash(&mut hasher);
        Ok(hasher.finish())
    }
}

impl fmt::Display for PoolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.pool, self.kind)?;
        if let Some(device) = self.device {
            write!(f, " on {device}")?;
        }
        if self.kind == UsmType::Shared && self.device_read_only {
            write!(f, " (device read-only)")?;
        }
        Ok(())
    }
}
