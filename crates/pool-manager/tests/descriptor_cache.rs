// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: descriptor cache backed by real disjoint pools.

use disjoint_pool::{DisjointPool, DisjointPoolConfig, PoolError};
use memory_provider::{create, SystemProvider, SystemProviderParams, UsmType};
use pool_manager::{
    ContextHandle, DeviceError, DeviceHandle, NativeHandle, PoolDescriptor, PoolHandle,
    PoolManager, StaticTopology,
};
use std::sync::Arc;

const CTX: ContextHandle = ContextHandle(0x10);
const POOL: PoolHandle = PoolHandle(0x20);

#[derive(Debug)]
enum TestError {
    Device(DeviceError),
    Pool(PoolError),
}

impl From<DeviceError> for TestError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<PoolError> for TestError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

/// Two physical devices; the first is partitioned into two sub-devices,
/// one of which aliases the parent.
fn topology() -> StaticTopology {
    let mut t = StaticTopology::new();
    t.add_device(CTX, DeviceHandle(1), NativeHandle(0xA));
    t.add_device(CTX, DeviceHandle(2), NativeHandle(0xB));
    t.add_sub_device(DeviceHandle(1), DeviceHandle(3), NativeHandle(0xA)).unwrap();
    t.add_sub_device(DeviceHandle(1), DeviceHandle(4), NativeHandle(0xC)).unwrap();
    t
}

fn make_pool(desc: &PoolDescriptor) -> Result<DisjointPool, TestError> {
    let mut params = SystemProviderParams::new(desc.kind);
    if let Some(device) = desc.device {
        params = params.with_device(device.0);
    }
    let provider = create::<SystemProvider>(params).map_err(PoolError::from)?;
    Ok(DisjointPool::new(
        &[provider],
        DisjointPoolConfig::default().with_name(desc.to_string()),
    )?)
}

#[test]
fn test_sub_device_shares_parent_pool() {
    let manager: PoolManager = PoolManager::new(Arc::new(topology()));
    let created = manager.populate(POOL, CTX, make_pool).unwrap();
    // host + 3 kinds for each of natives 0xA, 0xB, 0xC
    assert_eq!(created, 10);

    let parent = PoolDescriptor::for_device(POOL, CTX, DeviceHandle(1), UsmType::Device, false);
    let sub = PoolDescriptor::for_device(POOL, CTX, DeviceHandle(3), UsmType::Device, false);
    let a = manager.get_pool(&parent).unwrap().unwrap();
    let b = manager.get_pool(&sub).unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    // Memory from the parent's pool can be returned through the alias.
    let p = a.malloc(256).unwrap();
    b.free(p).unwrap();
}

#[test]
fn test_shared_read_only_pools_are_separate() {
    let manager: PoolManager = PoolManager::new(Arc::new(topology()));
    manager.populate(POOL, CTX, make_pool).unwrap();

    let rw = PoolDescriptor::for_device(POOL, CTX, DeviceHandle(2), UsmType::Shared, false);
    let ro = PoolDescriptor::for_device(POOL, CTX, DeviceHandle(2), UsmType::Shared, true);
    let a = manager.get_pool(&rw).unwrap().unwrap();
    let b = manager.get_pool(&ro).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
}

#[test]
fn test_enumeration_failure_creates_nothing() {
    let manager: PoolManager = PoolManager::new(Arc::new(topology()));
    let err = manager
        .populate(POOL, ContextHandle(0xdead), make_pool)
        .unwrap_err();
    assert!(matches!(err, TestError::Device(DeviceError::UnknownContext(_))));
    assert!(manager.is_empty());
}

#[test]
fn test_concurrent_lookups() {
    let manager: PoolManager = PoolManager::new(Arc::new(topology()));
    manager.populate(POOL, CTX, make_pool).unwrap();

    std::thread::scope(|s| {
        for device in [1u64, 2, 3, 4] {
            let manager = &manager;
            s.spawn(move || {
                let d = PoolDescriptor::for_device(
                    POOL,
                    CTX,
                    DeviceHandle(device),
                    UsmType::Device,
                    false,
                );
                for _ in 0..100 {
                    let pool = manager.get_pool(&d).unwrap().unwrap();
                    let p = pool.malloc(64).unwrap();
                    pool.free(p).unwrap();
                }
            });
        }
    });
    assert_eq!(manager.len(), 10);
}
