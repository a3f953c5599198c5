// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A context's USM pool: one disjoint pool per distinct descriptor.
//!
//! Every descriptor of the context gets a pool when the USM pool is
//! created. Each pool sits on its own [`SystemProvider`] and all of them
//! report into one [`SharedLimits`].

use crate::{UsmAllocation, UsmConfig, UsmError};
use disjoint_pool::{DisjointPool, PoolStats, SharedLimits};
use memory_provider::{create, SystemProvider, SystemProviderParams, UsmType};
use pool_manager::{ContextHandle, DeviceHandle, DeviceTopology, PoolDescriptor, PoolHandle, PoolManager};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_POOL: AtomicU64 = AtomicU64::new(1);

/// Pools of one context, keyed by descriptor.
#[derive(Debug)]
pub struct UsmPool {
    handle: PoolHandle,
    context: ContextHandle,
    manager: PoolManager<DisjointPool>,
    limits: Arc<SharedLimits>,
}

impl UsmPool {
    /// Creates every pool the context's descriptors call for.
    pub fn new(
        context: ContextHandle,
        topology: Arc<dyn DeviceTopology>,
        config: &UsmConfig,
    ) -> Result<Self, UsmError> {
        let handle = PoolHandle(NEXT_POOL.fetch_add(1, Ordering::Relaxed));
        let limits = config.limits();
        let manager = PoolManager::new(topology);

        let created = manager.populate(handle, context, |desc: &PoolDescriptor| {
            let mut params = SystemProviderParams::new(desc.kind);
            if let Some(device) = desc.device {
                params = params.with_device(device.0);
            }
            let provider = create::<SystemProvider>(params)?;
            let pool_config = config
                .pool_config(desc.kind, desc.device_read_only, Arc::clone(&limits))?
                .with_name(desc.to_string());
            Ok::<_, UsmError>(DisjointPool::new(&[provider], pool_config)?)
        })?;

        tracing::info!(%handle, %context, pools = created, "USM pool created");
        Ok(Self {
            handle,
            context,
            manager,
            limits,
        })
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle
    }

    /// Shared accounting of every pool in this USM pool.
    pub fn limits(&self) -> &Arc<SharedLimits> {
        &self.limits
    }

    /// Number of distinct underlying pools.
    pub fn num_pools(&self) -> usize {
        self.manager.len()
    }

    /// Descriptors that own a pool.
    pub fn descriptors(&self) -> Vec<PoolDescriptor> {
        self.manager.descriptors()
    }

    /// Statistics of every underlying pool.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.manager.pools().iter().map(|pool| pool.stats()).collect()
    }

    /// Releases retained slabs in every pool.
    pub fn trim(&self) -> Result<usize, UsmError> {
        let mut released = 0;
        for pool in self.manager.pools() {
            released += pool.trim()?;
        }
        Ok(released)
    }

    /// The pool serving (`device`, `kind`, `device_read_only`).
    ///
    /// Host memory ignores `device`; device and shared memory require one.
    pub fn pool_for(
        &self,
        device: Option<DeviceHandle>,
        kind: UsmType,
        device_read_only: bool,
    ) -> Result<Arc<DisjointPool>, UsmError> {
        let descriptor = match (kind, device) {
            (UsmType::Host, _) => PoolDescriptor::host(self.handle, self.context),
            (_, Some(device)) => PoolDescriptor::for_device(
                self.handle,
                self.context,
                device,
                kind,
                device_read_only,
            ),
            (_, None) => {
                return Err(UsmError::InvalidArgument(format!(
                    "{kind} allocations need a device"
                )))
            }
        };
        self.manager.get_pool(&descriptor)?.ok_or_else(|| {
            UsmError::InvalidArgument(format!("no pool for {descriptor} in context {}", self.context))
        })
    }

    /// Allocates `size` bytes of `kind` memory.
    pub fn allocate(
        &self,
        device: Option<DeviceHandle>,
        kind: UsmType,
        size: usize,
    ) -> Result<UsmAllocation, UsmError> {
        let pool = self.pool_for(device, kind, false)?;
        match pool.try_alloc(size) {
            Ok(ptr) => Ok(UsmAllocation::new(ptr, size, kind, pool)),
            Err(source) => Err(UsmError::OutOfResources { kind, size, source }),
        }
    }
}
