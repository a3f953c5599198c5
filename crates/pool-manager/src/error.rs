// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device queries.

use crate::{ContextHandle, DeviceHandle};

/// Failures of the device layer the cache is built on.
///
/// These are never folded into a "not found" answer: a descriptor that
/// cannot be resolved makes the comparison itself fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The context is not known to the topology.
    #[error("unknown context {0}")]
    UnknownContext(ContextHandle),

    /// The device handle is not known to the topology.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceHandle),

    /// The native identity of a device could not be resolved.
    #[error("cannot resolve native handle of device {device}: {reason}")]
    NativeResolution { device: DeviceHandle, reason: String },

    /// Listing devices or partitioning one into sub-devices failed.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
}
