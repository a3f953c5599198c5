// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device identities and the enumeration queries the cache depends on.
//!
//! A [`DeviceHandle`] is a logical handle: a parent device and each of its
//! sub-devices have different handles. A [`NativeHandle`] is the canonical
//! identity of the physical device behind a handle; two logical handles
//! with the same native handle denote the same memory.

use crate::DeviceError;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{:#x}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Logical device handle, as handed to callers.
    DeviceHandle,
    "dev@"
);
handle_type!(
    /// Canonical identity of a physical device.
    NativeHandle,
    "native@"
);
handle_type!(
    /// Owning context of a set of pools.
    ContextHandle,
    "ctx@"
);
handle_type!(
    /// Owning USM pool handle of a set of descriptors.
    PoolHandle,
    "pool@"
);

/// The device-management queries the descriptor cache consumes.
pub trait DeviceTopology: Send + Sync {
    /// Top-level devices of a context.
    fn devices(&self, context: ContextHandle) -> Result<Vec<DeviceHandle>, DeviceError>;

    /// Equal-partition sub-devices of `device`. Empty if it cannot be
    /// partitioned.
    fn sub_devices(&self, device: DeviceHandle) -> Result<Vec<DeviceHandle>, DeviceError>;

    /// Canonicalizes a logical device handle.
    fn native_handle(&self, device: DeviceHandle) -> Result<NativeHandle, DeviceError>;
}

/// Every device of `context`, followed by every sub-device reachable
/// through repeated partitioning.
///
/// Uses an explicit worklist, so partition depth does not grow the stack.
/// A handle reached twice is listed once.
pub fn enumerate_devices(
    topology: &dyn DeviceTopology,
    context: ContextHandle,
) -> Result<Vec<DeviceHandle>, DeviceError> {
    let mut all = Vec::new();
    let mut seen = HashSet::new();
    let mut worklist = topology.devices(context)?;
    worklist.reverse();

    while let Some(device) = worklist.pop() {
        if !seen.insert(device) {
            continue;
        }
        all.push(device);
        let mut children = topology.sub_devices(device)?;
        children.reverse();
        worklist.extend(children);
    }
    Ok(all)
}

#[derive(Debug, Clone)]
struct DeviceNode {
    native: NativeHandle,
    children: Vec<DeviceHandle>,
}

/// An in-memory [`DeviceTopology`] populated up front.
///
/// ```
/// use pool_manager::{ContextHandle, DeviceHandle, DeviceTopology, NativeHandle, StaticTopology};
///
/// let mut topo = StaticTopology::new();
/// let ctx = ContextHandle(1);
/// topo.add_device(ctx, DeviceHandle(10), NativeHandle(0xA));
/// topo.add_sub_device(DeviceHandle(10), DeviceHandle(11), NativeHandle(0xA)).unwrap();
///
/// assert_eq!(topo.sub_devices(DeviceHandle(10)).unwrap(), vec![DeviceHandle(11)]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    contexts: BTreeMap<ContextHandle, Vec<DeviceHandle>>,
    nodes: BTreeMap<DeviceHandle, DeviceNode>,
}

impl StaticTopology {
    /// An empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a top-level device of `context`.
    pub fn add_device(&mut self, context: ContextHandle, device: DeviceHandle, native: NativeHandle) {
        self.contexts.entry(context).or_default().push(device);
        self.nodes.insert(
            device,
            DeviceNode {
                native,
                children: Vec::new(),
            },
        );
    }

    /// Registers `device` as a sub-device of `parent`.
    pub fn add_sub_device(
        &mut self,
        parent: DeviceHandle,
        device: DeviceHandle,
        native: NativeHandle,
    ) -> Result<(), DeviceError> {
        self.nodes
            .get_mut(&parent)
            .ok_or(DeviceError::UnknownDevice(parent))?
            .children
            .push(device);
        self.nodes.insert(
            device,
            DeviceNode {
                native,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Whether `device` is registered.
    pub fn contains(&self, device: DeviceHandle) -> bool {
        self.nodes.contains_key(&device)
    }
}

impl DeviceTopology for StaticTopology {
    fn devices(&self, context: ContextHandle) -> Result<Vec<DeviceHandle>, DeviceError> {
        self.contexts
            .get(&context)
            .cloned()
            .ok_or(DeviceError::UnknownContext(context))
    }

    fn sub_devices(&self, device: DeviceHandle) -> Result<Vec<DeviceHandle>, DeviceError> {
        self.nodes
            .get(&device)
            .map(|node| node.children.clone())
            .ok_or(DeviceError::UnknownDevice(device))
    }

    fn native_handle(&self, device: DeviceHandle) -> Result<NativeHandle, DeviceError> {
        self.nodes
            .get(&device)
            .map(|node| node.native)
            .ok_or_else(|| DeviceError::NativeResolution {
                device,
                reason: "device is not registered".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_depth_first_preorder() {
        let ctx = ContextHandle(1);
        let mut topo = StaticTopology::new();
        topo.add_device(ctx, DeviceHandle(1), NativeHandle(100));
        topo.add_device(ctx, DeviceHandle(2), NativeHandle(200));
        topo.add_sub_device(DeviceHandle(1), DeviceHandle(11), NativeHandle(101)).unwrap();
        topo.add_sub_device(DeviceHandle(1), DeviceHandle(12), NativeHandle(102)).unwrap();
        topo.add_sub_device(DeviceHandle(11), DeviceHandle(111), NativeHandle(101)).unwrap();

        let all = enumerate_devices(&topo, ctx).unwrap();
        let ids: Vec<u64> = all.iter().map(|d| d.0).collect();
        assert_eq!(ids, vec![1, 11, 111, 12, 2]);
    }

    #[test]
    fn test_deep_partition_chain() {
        let ctx = ContextHandle(1);
        let mut topo = StaticTopology::new();
        topo.add_device(ctx, DeviceHandle(0), NativeHandle(0));
        for level in 1..10_000u64 {
            topo.add_sub_device(DeviceHandle(level - 1), DeviceHandle(level), NativeHandle(0))
                .unwrap();
        }
        assert_eq!(enumerate_devices(&topo, ctx).unwrap().len(), 10_000);
    }

    #[test]
    fn test_unknown_context_propagates() {
        let topo = StaticTopology::new();
        assert_eq!(
            enumerate_devices(&topo, ContextHandle(9)),
            Err(DeviceError::UnknownContext(ContextHandle(9)))
        );
    }

    #[test]
    fn test_add_sub_device_requires_parent() {
        let mut topo = StaticTopology::new();
        let err = topo
            .add_sub_device(DeviceHandle(1), DeviceHandle(2), NativeHandle(1))
            .unwrap_err();
        assert_eq!(err, DeviceError::UnknownDevice(DeviceHandle(1)));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(DeviceHandle(0x1f).to_string(), "dev@0x1f");
        assert_eq!(NativeHandle(2).to_string(), "native@0x2");
    }
}
