// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the USM runtime.

use memory_provider::UsmType;

/// Errors returned by contexts, pools, and memory handles.
#[derive(Debug, thiserror::Error)]
pub enum UsmError {
    /// A caller-supplied argument is invalid (unknown device, unmapped
    /// pointer, region outside the buffer).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request needs a capability the devices do not have.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A pool could not satisfy an allocation.
    #[error("out of {kind} memory allocating {size} bytes: {source}")]
    OutOfResources {
        kind: UsmType,
        size: usize,
        source: disjoint_pool::PoolError,
    },

    /// The borrowed copy primitive failed.
    #[error("copy of {size} bytes failed: {reason}")]
    CopyFailed { size: usize, reason: String },

    /// Pool construction or release failed.
    #[error("pool error: {0}")]
    PoolError(#[from] disjoint_pool::PoolError),

    /// The device layer failed to answer a query.
    #[error("device error: {0}")]
    DeviceError(#[from] pool_manager::DeviceError),

    /// A memory provider could not be created.
    #[error("provider error: {0}")]
    ProviderError(#[from] memory_provider::ProviderError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
