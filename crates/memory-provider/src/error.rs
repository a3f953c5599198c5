// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory providers.

/// Errors reported by a [`MemoryProvider`](crate::MemoryProvider).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The backend could not satisfy the request.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// An argument was rejected (unknown pointer, zero size, bad range).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The alignment is not a power of two.
    #[error("invalid alignment {0}: must be a power of two")]
    InvalidAlignment(usize),

    /// The provider does not implement the requested operation.
    #[error("provider '{provider}' does not support {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },

    /// The backend refused to initialize.
    #[error("provider initialization failed: {0}")]
    Initialization(String),

    /// A backend-specific failure.
    #[error("provider-specific error: {0}")]
    Specific(String),
}
