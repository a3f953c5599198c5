// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The descriptor cache proper.
//!
//! # Thread Safety
//! Entries sit behind an `RwLock`. Lookups take the read lock, so once the
//! cache is populated concurrent readers never block one another.

use crate::{ContextHandle, DeviceError, DeviceTopology, PoolDescriptor, PoolHandle, PoolKey};
use disjoint_pool::DisjointPool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

struct Entry<P> {
    descriptor: PoolDescriptor,
    pool: Arc<P>,
}

/// Maps pool descriptors to shared pool instances.
///
/// Descriptors that resolve to the same native device identity, kind, and
/// read-only flag map to one instance.
pub struct PoolManager<P = DisjointPool> {
    topology: Arc<dyn DeviceTopology>,
    pools: RwLock<HashMap<PoolKey, Entry<P>>>,
}

impl<P> PoolManager<P> {
    /// An empty cache resolving descriptors through `topology`.
    pub fn new(topology: Arc<dyn DeviceTopology>) -> Self {
        Self {
            topology,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Creates one pool per distinct descriptor of `context`.
    ///
    /// `factory` is called once per distinct pool, with the first
    /// descriptor that maps to it. Returns the number of pools created.
    pub fn populate<E, F>(
        &self,
        pool: PoolHandle,
        context: ContextHandle,
        mut factory: F,
    ) -> Result<usize, E>
    where
        E: From<DeviceError>,
        F: FnMut(&PoolDescriptor) -> Result<P, E>,
    {
        let descriptors = PoolDescriptor::create(pool, context, self.topology.as_ref())?;
        let mut created = 0;
        for descriptor in &descriptors {
            if self.get_pool(descriptor)?.is_some() {
                continue;
            }
            if self.add_pool(descriptor, Arc::new(factory(descriptor)?))? {
                created += 1;
            }
        }
        tracing::debug!(
            %context,
            descriptors = descriptors.len(),
            pools = created,
            "pool descriptors populated"
        );
        Ok(created)
    }

    /// Registers `pool` under `descriptor`.
    ///
    /// Returns `false` (and drops nothing) if an equal descriptor is already
    /// registered.
    pub fn add_pool(&self, descriptor: &PoolDescriptor, pool: Arc<P>) -> Result<bool, DeviceError> {
        let key = descriptor.resolve(self.topology.as_ref())?;
        let mut pools = self.write()?;
        if pools.contains_key(&key) {
            tracing::debug!(%descriptor, "pool already registered for descriptor");
            return Ok(false);
        }
        pools.insert(
            key,
            Entry {
                descriptor: *descriptor,
                pool,
            },
        );
        Ok(true)
    }

    /// The pool registered for `descriptor` or any descriptor equal to it.
    pub fn get_pool(&self, descriptor: &PoolDescriptor) -> Result<Option<Arc<P>>, DeviceError> {
        let key = descriptor.resolve(self.topology.as_ref())?;
        Ok(self.read()?.get(&key).map(|entry| Arc::clone(&entry.pool)))
    }

    /// Returns the pool for `descriptor`, creating it with `factory` if the
    /// cache has none.
    pub fn get_or_try_insert_with<E, F>(&self, descriptor: &PoolDescriptor, factory: F) -> Result<Arc<P>, E>
    where
        E: From<DeviceError>,
        F: FnOnce() -> Result<P, E>,
    {
        if let Some(pool) = self.get_pool(descriptor)? {
            return Ok(pool);
        }
        let key = descriptor.resolve(self.topology.as_ref())?;
        let mut pools = self.write()?;
        if let Some(entry) = pools.get(&key) {
            return Ok(Arc::clone(&entry.pool));
        }
        let pool = Arc::new(factory()?);
        pools.insert(
            key,
            Entry {
                descriptor: *descriptor,
                pool: Arc::clone(&pool),
            },
        );
        Ok(pool)
    }

    /// Descriptors under which pools were registered.
    pub fn descriptors(&self) -> Vec<PoolDescriptor> {
        match self.pools.read() {
            Ok(pools) => pools.values().map(|entry| entry.descriptor).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Every registered pool.
    pub fn pools(&self) -> Vec<Arc<P>> {
        match self.pools.read() {
            Ok(pools) => pools.values().map(|entry| Arc::clone(&entry.pool)).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Number of distinct pools.
    pub fn len(&self) -> usize {
        self.pools.read().map(|pools| pools.len()).unwrap_or(0)
    }

    /// Whether no pool is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The topology descriptors are resolved through.
    pub fn topology(&self) -> &Arc<dyn DeviceTopology> {
        &self.topology
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<PoolKey, Entry<P>>>, DeviceError> {
        self.pools
            .read()
            .map_err(|_| DeviceError::Enumeration("pool cache lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<PoolKey, Entry<P>>>, DeviceError> {
        self.pools
            .write()
            .map_err(|_| DeviceError::Enumeration("pool cache lock poisoned".into()))
    }
}

impl<P> std::fmt::Debug for PoolManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager").field("pools", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceHandle, NativeHandle, StaticTopology};
    use memory_provider::UsmType;

    const CTX: ContextHandle = ContextHandle(1);
    const POOL: PoolHandle = PoolHandle(1);

    fn manager() -> PoolManager<String> {
        let mut t = StaticTopology::new();
        t.add_device(CTX, DeviceHandle(1), NativeHandle(0xA));
        t.add_sub_device(DeviceHandle(1), DeviceHandle(2), NativeHandle(0xA)).unwrap();
        t.add_sub_device(DeviceHandle(1), DeviceHandle(3), NativeHandle(0xB)).unwrap();
        PoolManager::new(Arc::new(t))
    }

    #[test]
    fn test_add_refuses_duplicates() {
        let m = manager();
        let d1 = PoolDescriptor::for_device(POOL, CTX, DeviceHandle(1), UsmType::Device, false);
        let d2 = PoolDescriptor::for_device(POOL, CTX, DeviceHandle(2), UsmType::Device, false);
        assert!(m.add_pool(&d1, Arc::new("first".to_string())).unwrap());
        assert!(!m.add_pool(&d2, Arc::new("second".to_string())).unwrap());
        assert_eq!(m.get_pool(&d2).unwrap().unwrap().as_str(), "first");
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_populate_folds_aliases() {
        let m = manager();
        let created = m
            .populate(POOL, CTX, |d| Ok::<_, DeviceError>(d.to_string()))
            .unwrap();
        // host + (device, shared rw, shared ro) for natives 0xA and 0xB
        assert_eq!(created, 7);
        assert_eq!(m.len(), 7);
        assert_eq!(m.descriptors().len(), 7);
    }

    #[test]
    fn test_get_or_insert_creates_once() {
        let m = manager();
        let d = PoolDescriptor::host(POOL, CTX);
        let mut calls = 0;
        for _ in 0..3 {
            m.get_or_try_insert_with(&d, || {
                calls += 1;
                Ok::<_, DeviceError>("host".to_string())
            })
            .unwrap();
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unknown_device_is_an_error() {
        let m = manager();
        let d = PoolDescriptor::for_device(POOL, CTX, DeviceHandle(42), UsmType::Device, false);
        assert!(m.get_pool(&d).is_err());
        assert!(m.add_pool(&d, Arc::new(String::new())).is_err());
        assert!(m.is_empty());
    }
}
