// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! USM pool configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! max_pool_size = "16M"
//! pool_trace = 1
//!
//! [host]
//! max_poolable_size = "2M"
//! capacity = 4
//! slab_min_size = "64K"
//! min_bucket_size = 64
//!
//! [device]
//! max_poolable_size = "4M"
//! ```
//!
//! Tables that are left out keep their per-kind defaults.

use crate::UsmError;
use disjoint_pool::{ByteSize, DisjointPoolConfig, SharedLimits, DEFAULT_MAX_POOL_SIZE};
use memory_provider::UsmType;
use std::path::Path;
use std::sync::Arc;

/// Pool parameters of one memory kind.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KindConfig {
    /// Requests above this size bypass pooling.
    pub max_poolable_size: ByteSize,
    /// Fully-free slabs retained per bucket.
    pub capacity: usize,
    /// Minimum provider request.
    pub slab_min_size: ByteSize,
    /// Smallest size class in bytes.
    pub min_bucket_size: usize,
}

impl KindConfig {
    fn new(max_poolable: ByteSize, capacity: usize, slab_min: ByteSize) -> Self {
        Self {
            max_poolable_size: max_poolable,
            capacity,
            slab_min_size: slab_min,
            min_bucket_size: 64,
        }
    }

    /// Host allocations: 64K slabs, pooled up to 2M.
    pub fn host() -> Self {
        Self::new(ByteSize::from_mb(2), 4, ByteSize::from_kb(64))
    }

    /// Device allocations: 64K slabs, pooled up to 4M.
    pub fn device() -> Self {
        Self::new(ByteSize::from_mb(4), 4, ByteSize::from_kb(64))
    }

    /// Shared allocations: not pooled.
    pub fn shared() -> Self {
        Self::new(ByteSize::from_bytes(0), 0, ByteSize::from_mb(2))
    }

    /// Shared allocations the device only reads: 2M slabs, pooled up to 4M.
    pub fn shared_read_only() -> Self {
        Self::new(ByteSize::from_mb(4), 4, ByteSize::from_mb(2))
    }
}

/// Configuration of a context's default USM pool.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UsmConfig {
    /// Soft cap on pooled bytes across every kind.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: ByteSize,
    /// `0` silent, `1` usage summary on pool destruction, `2` every call.
    #[serde(default)]
    pub pool_trace: u8,
    #[serde(default = "KindConfig::host")]
    pub host: KindConfig,
    #[serde(default = "KindConfig::device")]
    pub device: KindConfig,
    #[serde(default = "KindConfig::shared")]
    pub shared: KindConfig,
    #[serde(default = "KindConfig::shared_read_only")]
    pub shared_read_only: KindConfig,
}

fn default_max_pool_size() -> ByteSize {
    ByteSize::from_bytes(DEFAULT_MAX_POOL_SIZE)
}

impl UsmConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, UsmError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UsmError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string and checks every kind.
    pub fn from_toml(toml_str: &str) -> Result<Self, UsmError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| UsmError::ConfigError(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, UsmError> {
        toml::to_string_pretty(self)
            .map_err(|e| UsmError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Fresh shared limits capped at `max_pool_size`.
    pub fn limits(&self) -> Arc<SharedLimits> {
        Arc::new(SharedLimits::new(self.max_pool_size.as_bytes()))
    }

    /// The parameter table for `kind`.
    pub fn kind(&self, kind: UsmType, device_read_only: bool) -> &KindConfig {
        match kind {
            UsmType::Host => &self.host,
            UsmType::Device => &self.device,
            UsmType::Shared if device_read_only => &self.shared_read_only,
            UsmType::Shared => &self.shared,
        }
    }

    /// Builds the pool configuration for `kind`, reporting into `limits`.
    pub fn pool_config(
        &self,
        kind: UsmType,
        device_read_only: bool,
        limits: Arc<SharedLimits>,
    ) -> Result<DisjointPoolConfig, UsmError> {
        let table = self.kind(kind, device_read_only);
        let name = if kind == UsmType::Shared && device_read_only {
            "shared-read-only".to_string()
        } else {
            kind.to_string()
        };
        let config = DisjointPoolConfig {
            name,
            slab_min_size: table.slab_min_size.as_bytes(),
            max_poolable_size: table.max_poolable_size.as_bytes(),
            capacity: table.capacity,
            min_bucket_size: table.min_bucket_size,
            pool_trace: self.pool_trace,
            limits,
        };
        config
            .validate()
            .map_err(|e| UsmError::ConfigError(format!("[{}] {e}", config.name)))?;
        Ok(config)
    }

    /// Checks that every kind yields a valid pool configuration.
    pub fn validate(&self) -> Result<(), UsmError> {
        let limits = self.limits();
        for (kind, read_only) in [
            (UsmType::Host, false),
            (UsmType::Device, false),
            (UsmType::Shared, false),
            (UsmType::Shared, true),
        ] {
            self.pool_config(kind, read_only, Arc::clone(&limits))?;
        }
        Ok(())
    }
}

impl Default for UsmConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            pool_trace: 0,
            host: KindConfig::host(),
            device: KindConfig::device(),
            shared: KindConfig::shared(),
            shared_read_only: KindConfig::shared_read_only(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = UsmConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.limits().max_size(), 16 * 1024 * 1024);

        let host = c.pool_config(UsmType::Host, false, c.limits()).unwrap();
        assert_eq!(host.slab_min_size, 64 * 1024);
        assert_eq!(host.max_poolable_size, 2 * 1024 * 1024);

        let shared = c.pool_config(UsmType::Shared, false, c.limits()).unwrap();
        assert_eq!(shared.max_poolable_size, 0);
        assert_eq!(shared.capacity, 0);

        let ro = c.pool_config(UsmType::Shared, true, c.limits()).unwrap();
        assert_eq!(ro.name, "shared-read-only");
        assert_eq!(ro.max_poolable_size, 4 * 1024 * 1024);
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
max_pool_size = "64M"
pool_trace = 2

[device]
max_poolable_size = "1M"
capacity = 8
slab_min_size = "128K"
min_bucket_size = 128
"#;
        let c = UsmConfig::from_toml(toml).unwrap();
        assert_eq!(c.pool_trace, 2);
        assert_eq!(c.limits().max_size(), 64 * 1024 * 1024);
        assert_eq!(c.device.capacity, 8);
        assert_eq!(c.host, KindConfig::host());
    }

    #[test]
    fn test_from_toml_rejects_bad_sizes() {
        let err = UsmConfig::from_toml("max_pool_size = \"lots\"").unwrap_err();
        assert!(matches!(err, UsmError::ConfigError(_)));
        assert!(err.to_string().contains("lots"));

        let toml = r#"
[host]
max_poolable_size = "2M"
capacity = 4
slab_min_size = "64K"
min_bucket_size = 100
"#;
        assert!(UsmConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let c = UsmConfig {
            pool_trace: 1,
            ..Default::default()
        };
        let text = c.to_toml().unwrap();
        assert_eq!(UsmConfig::from_toml(&text).unwrap(), c);
    }

    #[test]
    fn test_json_roundtrip() {
        let c = UsmConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let back: UsmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_sizes_written_compactly() {
        let text = UsmConfig::default().to_toml().unwrap();
        assert!(text.contains("max_pool_size = \"16M\""));
        assert!(text.contains("slab_min_size = \"64K\""));
        assert!(text.contains("max_poolable_size = \"0\""));

        let c = UsmConfig::from_toml("[host]\nmax_poolable_size = \"1 MB\"\ncapacity = 2\nslab_min_size = \"32768\"\nmin_bucket_size = 64\n").unwrap();
        assert_eq!(c.host.max_poolable_size, ByteSize::from_mb(1));
        assert_eq!(c.host.slab_min_size, ByteSize::from_kb(32));
    }

    #[test]
    fn test_from_missing_file() {
        let err = UsmConfig::from_file(Path::new("/nonexistent/usm.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}
