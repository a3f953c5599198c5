// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `usm topology`: show how devices fold onto pools.

use super::PlatformArgs;
use usm_runtime::{Context, UsmConfig};

pub fn execute(args: PlatformArgs, config: UsmConfig) -> anyhow::Result<()> {
    let platform = args.build()?;
    let ctx = Context::new(&platform, &platform.root_devices(), &config)?;

    println!("  Devices ({}):", platform.num_devices());
    for device in platform.devices() {
        let depth = {
            let mut depth = 0;
            let mut parent = device.parent;
            while let Some(p) = parent {
                depth += 1;
                parent = platform.devices()[p.0].parent;
            }
            depth
        };
        let peers: Vec<String> = ctx
            .p2p_devices(device.handle)?
            .iter()
            .filter_map(|h| platform.device(*h).map(|d| d.name.clone()))
            .collect();
        println!(
            "   {:indent$}{:<10} {:>4}  {}  {}{}  peers: [{}]",
            "",
            device.name,
            device.id.to_string(),
            device.handle,
            device.native,
            if device.integrated { "  integrated" } else { "" },
            peers.join(", "),
            indent = depth * 2,
        );
    }
    println!();

    let pool = ctx.default_pool();
    let mut descriptors = pool.descriptors();
    descriptors.sort_by_key(|d| (d.device, d.kind, d.device_read_only));
    println!("  Distinct pools ({}):", pool.num_pools());
    for descriptor in &descriptors {
        println!("   {descriptor}");
    }
    println!();
    println!(
        "  Buffers use the {} representation.",
        if ctx.is_integrated() { "integrated" } else { "discrete" }
    );
    Ok(())
}
