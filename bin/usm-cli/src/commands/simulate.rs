// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `usm simulate`: concurrent buffer workload over one context.

use super::PlatformArgs;
use disjoint_pool::ByteSize;
use std::sync::Arc;
use std::time::Instant;
use usm_runtime::{AccessMode, Buffer, Context, HostCopy, UsmConfig};

pub async fn execute(
    args: PlatformArgs,
    config: UsmConfig,
    threads: usize,
    buffers: usize,
    size: String,
    json: bool,
) -> anyhow::Result<()> {
    let size = ByteSize::parse(&size)?.as_bytes();
    anyhow::ensure!(size > 0, "buffer size must be non-zero");
    anyhow::ensure!(threads > 0, "at least one worker is required");

    let platform = args.build()?;
    let ctx = Context::new(&platform, &platform.root_devices(), &config)?;

    if !json {
        println!("╔══════════════════════════════════════════════════════╗");
        println!("║              usm · Buffer Workload                  ║");
        println!("╚══════════════════════════════════════════════════════╝");
        println!();
        println!("  Config:");
        println!("   Devices:  {}", ctx.devices().len());
        println!("   Workers:  {threads}");
        println!("   Buffers:  {buffers} per worker");
        println!("   Size:     {}", ByteSize::from_bytes(size));
        println!("   Pool cap: {}", config.max_pool_size);
        println!();
    }

    // ── Workers ────────────────────────────────────────────────
    let start = Instant::now();
    let mut tasks = Vec::with_capacity(threads);
    for worker in 0..threads {
        let ctx = Arc::clone(&ctx);
        tasks.push(tokio::task::spawn_blocking(move || {
            run_worker(&ctx, worker, buffers, size)
        }));
    }
    let mut verified = 0usize;
    for task in tasks {
        verified += task.await??;
    }
    let elapsed = start.elapsed();
    tracing::info!(verified, ?elapsed, "workload finished");

    // ── Report ─────────────────────────────────────────────────
    let pool = ctx.default_pool();
    let mut stats = pool.stats();
    stats.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("  Results:");
    println!("   Buffers verified: {verified}");
    println!("   Elapsed:          {elapsed:.2?}");
    println!(
        "   Pooled bytes:     {} (cap {})",
        ByteSize::from_bytes(pool.limits().total_size()),
        ByteSize::from_bytes(pool.limits().max_size()),
    );
    println!();
    println!("  Pool Stats:");
    for s in stats.iter().filter(|s| s.total_allocations() > 0) {
        println!("   {}", s.summary());
    }
    println!();

    let released = pool.trim()?;
    println!("  Trimmed {released} retained slab(s).");
    Ok(())
}

/// Creates, touches, and verifies `buffers` buffers. Returns how many
/// read back the pattern written through the host mapping.
fn run_worker(
    ctx: &Arc<Context>,
    worker: usize,
    buffers: usize,
    size: usize,
) -> anyhow::Result<usize> {
    let devices = ctx.devices();
    let mut verified = 0;

    for i in 0..buffers {
        let buffer = Buffer::new(ctx, size)?;
        let device = devices[(worker + i) % devices.len()];
        let pattern = (worker * 31 + i) as u8;

        buffer.device_ptr(device, AccessMode::ReadWrite, 0, size, &HostCopy)?;

        let ptr = buffer.map_host_ptr(AccessMode::WriteOnly, 0, size, &HostCopy)?;
        // SAFETY: the mapping covers `size` writable bytes until unmapped.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), pattern, size) };
        buffer.unmap_host_ptr(ptr, &HostCopy)?;

        let ptr = buffer.map_host_ptr(AccessMode::ReadOnly, 0, size, &HostCopy)?;
        // SAFETY: the mapping covers `size` readable bytes until unmapped.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
        if bytes.iter().all(|&b| b == pattern) {
            verified += 1;
        } else {
            tracing::warn!(worker, buffer = i, "pattern mismatch after host roundtrip");
        }
        buffer.unmap_host_ptr(ptr, &HostCopy)?;
    }
    Ok(verified)
}
