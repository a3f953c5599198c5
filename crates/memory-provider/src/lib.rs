// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-provider
//!
//! Raw allocation backends for unified shared memory (USM) pools.
//!
//! A memory provider is the lowest layer of the allocation stack: it hands
//! out provider-backed regions and takes them back, nothing more. Pooling,
//! size classes, and coherence all live above it.
//!
//! # Key Components
//!
//! - [`MemoryProvider`]: the capability set every backend implements
//!   (`alloc`, `free`, `set_attrs`, `last_result`, plus page-size and purge
//!   queries).
//! - [`SystemProvider`]: the backend used by this runtime: host, device,
//!   and shared memory are served from the process heap, with optional
//!   capacity limits to model device exhaustion.
//! - [`NullProvider`]: a no-op backend for tests.
//! - [`TracingProvider`]: a decorator that forwards to an inner provider
//!   and counts every call per operation.
//!
//! # Composition
//!
//! ```text
//! TracingProvider ──inner──► SystemProvider
//!        │                        │
//!   call counters           live allocations
//! ```
//!
//! Decorators hold the inner provider as a [`ProviderHandle`], so any
//! number of them can be stacked without an inheritance chain.
//!
//! # Example
//! ```
//! use memory_provider::{create, SystemProvider, SystemProviderParams, UsmType};
//!
//! let provider = create::<SystemProvider>(SystemProviderParams::new(UsmType::Host)).unwrap();
//! let ptr = provider.alloc(4096, 64).unwrap();
//! assert_eq!(ptr.as_ptr() as usize % 64, 0);
//! unsafe { provider.free(ptr, 4096).unwrap() };
//! ```

mod error;
mod null;
mod provider;
mod system;
mod trace;

pub use error::ProviderError;
pub use null::NullProvider;
pub use provider::{
    InitProvider, MemoryAdvice, MemoryProvider, ProviderHandle, UsmType, DEFAULT_ALIGNMENT,
    DEFAULT_PAGE_SIZE,
};
pub use system::{SystemProvider, SystemProviderParams};
pub use trace::TracingProvider;

use std::sync::Arc;

/// Initializes a provider of type `P` and returns a shared handle to it.
///
/// Initialization failures are returned unchanged and no provider is
/// created. Dropping the last handle destroys the provider.
pub fn create<P: InitProvider>(params: P::Params) -> Result<ProviderHandle, ProviderError> {
    let provider = P::initialize(params)?;
    tracing::debug!(provider = provider.name(), "memory provider created");
    Ok(Arc::new(provider))
}
