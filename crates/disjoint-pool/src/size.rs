// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Human-readable byte sizes for pool configuration.
//!
//! Pool limits are written as `"64K"`, `"2M"`, or `"16MB"` in configuration
//! files. [`ByteSize`] parses and prints them.

use crate::PoolError;
use std::fmt;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// A byte count with human-readable parsing.
///
/// # Parsing
/// - `"64K"` or `"64KB"` → 64 × 1024 bytes
/// - `"2M"` or `"2MB"` → 2 × 1024² bytes
/// - `"1G"` or `"1GB"` → 1024³ bytes
/// - `"512"` or `"512B"` → raw byte count
///
/// Unlike a memory budget, zero is a valid size: it disables pooling when
/// used as a maximum poolable size.
///
/// Serialized as the compact string form (`"64K"`, `"16M"`, `"96"`).
///
/// # Examples
/// ```
/// use disjoint_pool::ByteSize;
///
/// assert_eq!(ByteSize::parse("64K").unwrap().as_bytes(), 65536);
/// assert_eq!(ByteSize::from_mb(2).to_string(), "2 MB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ByteSize {
    bytes: usize,
}

impl ByteSize {
    /// Creates a size from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a size from kibibytes.
    pub fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * KB }
    }

    /// Creates a size from mebibytes.
    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MB }
    }

    /// Returns the size in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Parses a human-readable size string. Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, PoolError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PoolError::InvalidSize("empty size string".into()));
        }

        let upper = s.to_uppercase();
        let (num_str, multiplier) = if upper.ends_with("GB") {
            (&s[..s.len() - 2], GB)
        } else if upper.ends_with('G') {
            (&s[..s.len() - 1], GB)
        } else if upper.ends_with("MB") {
            (&s[..s.len() - 2], MB)
        } else if upper.ends_with('M') {
            (&s[..s.len() - 1], MB)
        } else if upper.ends_with("KB") {
            (&s[..s.len() - 2], KB)
        } else if upper.ends_with('K') {
            (&s[..s.len() - 1], KB)
        } else if upper.ends_with('B') {
            (&s[..s.len() - 1], 1)
        } else {
            (s, 1)
        };

        let value: usize = num_str.trim().parse().map_err(|_| {
            PoolError::InvalidSize(format!(
                "'{s}': expected a number followed by an optional suffix (K, M, G)"
            ))
        })?;

        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| PoolError::InvalidSize(format!("'{s}' overflows")))?;

        Ok(Self { bytes })
    }
}

impl TryFrom<String> for ByteSize {
    type Error = PoolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ByteSize> for String {
    /// The largest exact unit, without a space: `"64K"`, `"2M"`, `"96"`.
    fn from(size: ByteSize) -> Self {
        let bytes = size.bytes;
        if bytes == 0 {
            return "0".into();
        }
        for (unit, suffix) in [(GB, "G"), (MB, "M"), (KB, "K")] {
            if bytes % unit == 0 {
                return format!("{}{suffix}", bytes / unit);
            }
        }
        bytes.to_string()
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes >= GB && self.bytes % GB == 0 {
            write!(f, "{} GB", self.bytes / GB)
        } else if self.bytes >= MB && self.bytes % MB == 0 {
            write!(f, "{} MB", self.bytes / MB)
        } else if self.bytes >= KB && self.bytes % KB == 0 {
            write!(f, "{} KB", self.bytes / KB)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}
