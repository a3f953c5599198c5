// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the setup they share.

pub mod config;
pub mod simulate;
pub mod topology;

use std::path::Path;
use std::sync::Arc;
use usm_runtime::{DeviceSpec, Platform, UsmConfig};

/// Emulated devices to build.
#[derive(Debug, Clone, clap::Args)]
pub struct PlatformArgs {
    /// Number of discrete devices.
    #[arg(long, default_value_t = 2)]
    pub discrete: usize,

    /// Equal sub-devices per device (0 = none, 1 = one alias of the whole device).
    #[arg(long, default_value_t = 0)]
    pub partitions: usize,

    /// Use a single integrated device instead of discrete ones.
    #[arg(long)]
    pub integrated: bool,

    /// Give every pair of devices peer access.
    #[arg(long)]
    pub peer_all: bool,
}

impl PlatformArgs {
    pub fn build(&self) -> anyhow::Result<Arc<Platform>> {
        let mut builder = Platform::builder().host_import(true);
        if self.integrated {
            builder = builder.device(DeviceSpec::integrated("igpu"));
        } else {
            anyhow::ensure!(self.discrete > 0, "at least one discrete device is required");
            for i in 0..self.discrete {
                let mut spec = DeviceSpec::discrete(format!("gpu{i}"));
                if self.partitions > 0 {
                    spec = spec.partition(self.partitions);
                }
                builder = builder.device(spec);
            }
            if self.peer_all {
                for a in 0..self.discrete {
                    for b in a + 1..self.discrete {
                        builder = builder.peer_access(format!("gpu{a}"), format!("gpu{b}"));
                    }
                }
            }
        }
        Ok(builder.build()?)
    }
}

/// Loads the pool configuration, or the defaults if no file was given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<UsmConfig> {
    match path {
        Some(path) => Ok(UsmConfig::from_file(path)?),
        None => Ok(UsmConfig::default()),
    }
}

/// Installs the tracing subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 3)
        .init();
}
