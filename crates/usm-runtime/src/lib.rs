// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # usm-runtime
//!
//! Unified shared memory for a host and several emulated devices: contexts,
//! their default USM pools, and buffers that keep one authoritative copy of
//! their bytes as they move between device and host memory.
//!
//! # Key Components
//!
//! - [`Platform`]: devices, sub-devices, peer access, discovered once.
//! - [`Context`]: a device set with a default [`UsmPool`] that routes
//!   (device, kind, size) to a disjoint pool through the descriptor cache.
//! - [`Buffer`]: a reference-counted buffer over a [`MemHandle`]:
//!   integrated, discrete, or wrapped USM memory.
//! - [`UsmConfig`]: pool parameters per memory kind, loadable from TOML.
//!
//! # Allocation Stack
//!
//! ```text
//! Buffer ──► DiscreteMemHandle ──► UsmPool ──► PoolManager ──► DisjointPool ──► SystemProvider
//!                 │
//!            MemCopy (borrowed, synchronous)
//! ```
//!
//! # Example
//! ```
//! use usm_runtime::{AccessMode, Buffer, Context, DeviceSpec, HostCopy, Platform, UsmConfig};
//!
//! let platform = Platform::builder()
//!     .device(DeviceSpec::discrete("gpu0"))
//!     .build()
//!     .unwrap();
//! let ctx = Context::new(&platform, &platform.root_devices(), &UsmConfig::default()).unwrap();
//!
//! let buffer = Buffer::from_slice(&ctx, b"hello").unwrap();
//! let host = buffer.map_host_ptr(AccessMode::ReadOnly, 0, 5, &HostCopy).unwrap();
//! assert_eq!(unsafe { std::slice::from_raw_parts(host.as_ptr(), 5) }, b"hello");
//! buffer.unmap_host_ptr(host, &HostCopy).unwrap();
//! ```

mod allocation;
mod buffer;
mod config;
mod context;
mod copy;
mod error;
pub mod handle;
mod platform;
mod usm_pool;

pub use allocation::UsmAllocation;
pub use buffer::{Buffer, MemInfo};
pub use config::{KindConfig, UsmConfig};
pub use context::Context;
pub use copy::{HostCopy, MemCopy};
pub use error::UsmError;
pub use handle::{AccessMode, HandleKind, MemHandle};
pub use platform::{DeviceId, DeviceInfo, DeviceSpec, Platform, PlatformBuilder};
pub use usm_pool::UsmPool;

pub use memory_provider::UsmType;
pub use pool_manager::{ContextHandle, DeviceHandle};
