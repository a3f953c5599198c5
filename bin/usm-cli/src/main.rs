// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # usm
//!
//! Command-line driver for the USM memory engine.
//!
//! ## Usage
//! ```bash
//! # Show devices, descriptors, and the pools they fold onto
//! usm topology --discrete 2 --partitions 2
//!
//! # Hammer a context's buffers from several threads and print pool stats
//! usm simulate --threads 8 --buffers 64 --size 64K
//!
//! # Print the effective pool configuration
//! usm --config usm.toml config
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "usm",
    about = "Unified shared memory pools and buffer coherence on emulated devices",
    version,
    author
)]
struct Cli {
    /// Path to a TOML pool configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print devices, sub-devices, pool descriptors, and distinct pools.
    Topology {
        #[command(flatten)]
        platform: commands::PlatformArgs,
    },

    /// Run a concurrent buffer workload and report pool statistics.
    Simulate {
        #[command(flatten)]
        platform: commands::PlatformArgs,

        /// Worker threads.
        #[arg(short, long, default_value_t = 4)]
        threads: usize,

        /// Buffers created by each worker.
        #[arg(short, long, default_value_t = 32)]
        buffers: usize,

        /// Buffer size (e.g., "4K", "1M").
        #[arg(short, long, default_value = "64K")]
        size: String,

        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective pool configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Topology { platform } => commands::topology::execute(platform, config),
        Commands::Simulate {
            platform,
            threads,
            buffers,
            size,
            json,
        } => commands::simulate::execute(platform, config, threads, buffers, size, json).await,
        Commands::Config => commands::config::execute(config),
    }
}
