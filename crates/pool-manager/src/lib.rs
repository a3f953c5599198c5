// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # pool-manager
//!
//! One pool instance per distinct (pool handle, device identity, memory
//! kind, read-only flag), with device hierarchies folded by native
//! identity.
//!
//! ```text
//! dev@0x1 ─┬─ dev@0x2 (sub-device)   native@0xa ──► device pool A
//!          └─ dev@0x3 (sub-device)   native@0xb ──► device pool B
//! dev@0x1                            native@0xa ──► device pool A
//! ```
//!
//! # Key Components
//!
//! - [`DeviceTopology`]: the device-enumeration and native-identity
//!   queries the cache is built on; [`StaticTopology`] is an in-memory
//!   implementation.
//! - [`PoolDescriptor`]: the logical key; equality and hashing resolve
//!   through the topology and fail if it cannot answer.
//! - [`PoolManager`]: the cache itself.

mod descriptor;
mod device;
mod error;
mod manager;

pub use descriptor::{PoolDescriptor, PoolKey};
pub use device::{
    enumerate_devices, ContextHandle, DeviceHandle, DeviceTopology, NativeHandle, PoolHandle,
    StaticTopology,
};
pub use error::DeviceError;
pub use manager::PoolManager;
