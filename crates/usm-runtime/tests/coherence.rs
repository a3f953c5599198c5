// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: buffer coherence across emulated devices.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use usm_runtime::{
    AccessMode, Buffer, Context, DeviceSpec, HandleKind, HostCopy, MemCopy, Platform, UsmConfig,
    UsmError, UsmType,
};

// ── Helpers ────────────────────────────────────────────────────

/// Host copy that counts calls and bytes.
#[derive(Default)]
struct CountingCopy {
    calls: AtomicUsize,
    bytes: AtomicUsize,
}

impl CountingCopy {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MemCopy for CountingCopy {
    unsafe fn copy(&self, src: *const u8, dst: *mut u8, len: usize) -> Result<(), UsmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(len, Ordering::SeqCst);
        HostCopy.copy(src, dst, len)
    }
}

/// gpu0 and gpu1 are peers; gpu2 is isolated.
fn discrete_context() -> Arc<Context> {
    let platform = Platform::builder()
        .device(DeviceSpec::discrete("gpu0"))
        .device(DeviceSpec::discrete("gpu1"))
        .device(DeviceSpec::discrete("gpu2"))
        .peer_access("gpu0", "gpu1")
        .build()
        .unwrap();
    Context::new(&platform, &platform.root_devices(), &UsmConfig::default()).unwrap()
}

fn integrated_context(host_import: bool) -> Arc<Context> {
    let platform = Platform::builder()
        .device(DeviceSpec::integrated("igpu"))
        .host_import(host_import)
        .build()
        .unwrap();
    Context::new(&platform, &platform.root_devices(), &UsmConfig::default()).unwrap()
}

fn read(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }.to_vec()
}

fn fill(ptr: NonNull<u8>, len: usize, value: u8) {
    unsafe { std::ptr::write_bytes(ptr.as_ptr(), value, len) };
}

// ── Discrete Scenarios ─────────────────────────────────────────

#[test]
fn test_first_touch_allocates_without_copy() {
    let ctx = discrete_context();
    let [a, _, c] = [ctx.devices()[0], ctx.devices()[1], ctx.devices()[2]];
    let buffer = Buffer::new(&ctx, 4096).unwrap();
    assert_eq!(buffer.kind(), HandleKind::Discrete);

    let copy = CountingCopy::default();
    buffer
        .device_ptr(a, AccessMode::WriteOnly, 0, 4096, &copy)
        .unwrap();
    assert_eq!(copy.calls(), 0);

    let err = buffer
        .device_ptr(c, AccessMode::ReadOnly, 0, 4096, &copy)
        .unwrap_err();
    assert!(matches!(err, UsmError::UnsupportedFeature(_)));
    assert_eq!(copy.calls(), 0);
}

#[test]
fn test_peer_gets_active_device_pointer() {
    let ctx = discrete_context();
    let [a, b] = [ctx.devices()[0], ctx.devices()[1]];
    let buffer = Buffer::new(&ctx, 1024).unwrap();

    let copy = CountingCopy::default();
    let on_a = buffer.device_ptr(a, AccessMode::ReadWrite, 0, 1024, &copy).unwrap();
    let from_b = buffer.device_ptr(b, AccessMode::ReadOnly, 128, 64, &copy).unwrap();
    assert_eq!(from_b.as_ptr() as usize, on_a.as_ptr() as usize + 128);
    assert_eq!(copy.calls(), 0);
}

#[test]
fn test_map_write_unmap_roundtrip() {
    let ctx = discrete_context();
    let dev = ctx.devices()[0];
    let buffer = Buffer::new(&ctx, 4096).unwrap();
    buffer.device_ptr(dev, AccessMode::ReadWrite, 0, 4096, &HostCopy).unwrap();

    let copy = CountingCopy::default();
    let host = buffer.map_host_ptr(AccessMode::ReadWrite, 1024, 512, &copy).unwrap();
    assert_eq!(copy.calls(), 1);
    fill(host, 512, 0x5A);
    buffer.unmap_host_ptr(host, &copy).unwrap();
    assert_eq!(copy.calls(), 2);

    let again = buffer.map_host_ptr(AccessMode::ReadOnly, 1024, 512, &copy).unwrap();
    assert_eq!(read(again, 512), vec![0x5A; 512]);
    buffer.unmap_host_ptr(again, &copy).unwrap();
    // read-only: copied in, not back
    assert_eq!(copy.calls(), 3);

    let device = buffer.device_ptr(dev, AccessMode::ReadOnly, 1024, 512, &copy).unwrap();
    assert_eq!(read(device, 512), vec![0x5A; 512]);
}

#[test]
fn test_unmap_unknown_pointer() {
    let ctx = discrete_context();
    let buffer = Buffer::new(&ctx, 256).unwrap();
    let copy = CountingCopy::default();
    let mapped = buffer.map_host_ptr(AccessMode::ReadWrite, 0, 256, &copy).unwrap();

    let mut other = [0u8; 16];
    let bogus = NonNull::new(other.as_mut_ptr()).unwrap();
    let err = buffer.unmap_host_ptr(bogus, &copy).unwrap_err();
    assert!(matches!(err, UsmError::InvalidArgument(_)));
    assert_eq!(copy.calls(), 0);

    buffer.unmap_host_ptr(mapped, &copy).unwrap();
    // A second unmap of the same pointer is unknown too.
    assert!(matches!(
        buffer.unmap_host_ptr(mapped, &copy),
        Err(UsmError::InvalidArgument(_))
    ));
}

#[test]
fn test_unmap_without_device_allocates_first_device() {
    let ctx = discrete_context();
    let buffer = Buffer::new(&ctx, 128).unwrap();
    let copy = CountingCopy::default();

    let host = buffer.map_host_ptr(AccessMode::WriteOnly, 0, 128, &copy).unwrap();
    assert_eq!(copy.calls(), 0);
    fill(host, 128, 7);
    buffer.unmap_host_ptr(host, &copy).unwrap();
    assert_eq!(copy.calls(), 1);

    let p = buffer
        .device_ptr(ctx.devices()[0], AccessMode::ReadOnly, 0, 128, &copy)
        .unwrap();
    assert_eq!(read(p, 128), vec![7; 128]);
}

#[test]
fn test_write_invalidate_moves_nothing() {
    let ctx = discrete_context();
    let buffer = Buffer::from_slice(&ctx, &[1u8; 64]).unwrap();
    let copy = CountingCopy::default();
    let host = buffer
        .map_host_ptr(AccessMode::WriteInvalidate, 0, 64, &copy)
        .unwrap();
    buffer.unmap_host_ptr(host, &copy).unwrap();
    assert_eq!(copy.calls(), 0);
}

#[test]
fn test_independent_overlapping_maps() {
    let ctx = discrete_context();
    let buffer = Buffer::from_slice(&ctx, &[3u8; 256]).unwrap();
    let a = buffer.map_host_ptr(AccessMode::ReadOnly, 0, 256, &HostCopy).unwrap();
    let b = buffer.map_host_ptr(AccessMode::ReadOnly, 64, 64, &HostCopy).unwrap();
    assert_ne!(a, b);
    assert_eq!(read(b, 64), vec![3; 64]);
    buffer.unmap_host_ptr(b, &HostCopy).unwrap();
    buffer.unmap_host_ptr(a, &HostCopy).unwrap();
}

#[test]
fn test_failed_copy_keeps_mapping() {
    let ctx = discrete_context();
    let buffer = Buffer::from_slice(&ctx, &[0u8; 32]).unwrap();
    let host = buffer.map_host_ptr(AccessMode::ReadWrite, 0, 32, &HostCopy).unwrap();

    let failing = |_: *const u8, _: *mut u8, len: usize| -> Result<(), UsmError> {
        Err(UsmError::CopyFailed {
            size: len,
            reason: "queue lost".into(),
        })
    };
    assert!(matches!(
        buffer.unmap_host_ptr(host, &failing),
        Err(UsmError::CopyFailed { .. })
    ));
    // The mapping survives and can still be released.
    buffer.unmap_host_ptr(host, &HostCopy).unwrap();
}

#[test]
fn test_out_of_range_region() {
    let ctx = discrete_context();
    let buffer = Buffer::new(&ctx, 100).unwrap();
    assert!(matches!(
        buffer.map_host_ptr(AccessMode::ReadOnly, 90, 20, &HostCopy),
        Err(UsmError::InvalidArgument(_))
    ));
    assert!(matches!(
        buffer.device_ptr(ctx.devices()[0], AccessMode::ReadOnly, 101, 0, &HostCopy),
        Err(UsmError::InvalidArgument(_))
    ));
}

// ── Lifetime ───────────────────────────────────────────────────

#[test]
fn test_release_frees_everything() {
    let ctx = discrete_context();
    let limits = Arc::clone(ctx.default_pool().limits());
    let buffer = Buffer::new(&ctx, 8192).unwrap();
    buffer.device_ptr(ctx.devices()[0], AccessMode::ReadWrite, 0, 8192, &HostCopy).unwrap();
    let _leaked_map = buffer.map_host_ptr(AccessMode::ReadOnly, 0, 8192, &HostCopy).unwrap();

    let second = buffer.retain();
    assert_eq!(buffer.ref_count(), 2);
    assert!(!second.release());
    assert_eq!(buffer.ref_count(), 1);
    assert!(buffer.release());

    ctx.default_pool().trim().unwrap();
    assert_eq!(limits.total_size(), 0);
    let stats = ctx.default_pool().stats();
    let allocs: u64 = stats.iter().map(|s| s.total_allocations()).sum();
    let frees: u64 = stats
        .iter()
        .map(|s| s.large_frees + s.buckets.iter().map(|b| b.frees).sum::<u64>())
        .sum();
    assert_eq!(allocs, frees);
}

#[test]
fn test_info() {
    let ctx = discrete_context();
    let buffer = Buffer::new(&ctx, 333).unwrap();
    let info = buffer.info();
    assert_eq!(info.size, 333);
    assert_eq!(info.context, ctx.handle());
    assert!(Buffer::new(&ctx, 0).is_err());
}

// ── Integrated ─────────────────────────────────────────────────

#[test]
fn test_integrated_is_pass_through() {
    let ctx = integrated_context(false);
    assert!(ctx.is_integrated());
    let buffer = Buffer::from_slice(&ctx, b"integrated").unwrap();
    assert_eq!(buffer.kind(), HandleKind::Integrated);

    let copy = CountingCopy::default();
    let dev = buffer
        .device_ptr(ctx.devices()[0], AccessMode::ReadWrite, 0, 10, &copy)
        .unwrap();
    let host = buffer.map_host_ptr(AccessMode::ReadWrite, 0, 10, &copy).unwrap();
    assert_eq!(dev, host);
    assert_eq!(read(host, 10), b"integrated");
    buffer.unmap_host_ptr(host, &copy).unwrap();
    assert_eq!(copy.calls(), 0);
}

#[test]
fn test_integrated_import() {
    let mut storage = vec![9u8; 64];
    let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();

    let ctx = integrated_context(true);
    let buffer = unsafe { Buffer::use_host_ptr(&ctx, ptr, 64) }.unwrap();
    let host = buffer.map_host_ptr(AccessMode::ReadOnly, 0, 64, &HostCopy).unwrap();
    assert_eq!(host, ptr);
    drop(buffer);

    // Without import support the bytes are copied into pool memory.
    let ctx = integrated_context(false);
    let buffer = unsafe { Buffer::use_host_ptr(&ctx, ptr, 64) }.unwrap();
    let host = buffer.map_host_ptr(AccessMode::ReadOnly, 0, 64, &HostCopy).unwrap();
    assert_ne!(host, ptr);
    assert_eq!(read(host, 64), vec![9; 64]);
}

#[test]
fn test_usm_handle_wraps_pointer() {
    let ctx = discrete_context();
    let alloc = ctx
        .default_pool()
        .allocate(Some(ctx.devices()[0]), UsmType::Shared, 512)
        .unwrap();
    let buffer = unsafe { Buffer::from_usm(&ctx, alloc.as_ptr(), 512) }.unwrap();
    assert_eq!(buffer.kind(), HandleKind::Usm);
    let p = buffer
        .device_ptr(ctx.devices()[2], AccessMode::ReadOnly, 16, 16, &HostCopy)
        .unwrap();
    assert_eq!(p.as_ptr() as usize, alloc.as_ptr().as_ptr() as usize + 16);
}

// ── Concurrency ────────────────────────────────────────────────

#[test]
fn test_concurrent_maps_on_one_buffer() {
    let ctx = discrete_context();
    let buffer = Buffer::new(&ctx, 64 * 16).unwrap();
    buffer.device_ptr(ctx.devices()[0], AccessMode::ReadWrite, 0, 64 * 16, &HostCopy).unwrap();

    std::thread::scope(|s| {
        for i in 0..16usize {
            let buffer = buffer.retain();
            s.spawn(move || {
                for _ in 0..50 {
                    let host = buffer
                        .map_host_ptr(AccessMode::WriteOnly, i * 64, 64, &HostCopy)
                        .unwrap();
                    fill(host, 64, i as u8);
                    buffer.unmap_host_ptr(host, &HostCopy).unwrap();
                }
            });
        }
    });

    let host = buffer.map_host_ptr(AccessMode::ReadOnly, 0, 64 * 16, &HostCopy).unwrap();
    let bytes = read(host, 64 * 16);
    for i in 0..16 {
        assert!(bytes[i * 64..(i + 1) * 64].iter().all(|&b| b == i as u8));
    }
    buffer.unmap_host_ptr(host, &HostCopy).unwrap();
    assert_eq!(buffer.ref_count(), 1);
}

#[test]
fn test_concurrent_release_reports_last_once() {
    let ctx = discrete_context();
    for _ in 0..200 {
        let buffer = Buffer::new(&ctx, 256).unwrap();
        buffer.device_ptr(ctx.devices()[0], AccessMode::ReadWrite, 0, 256, &HostCopy).unwrap();
        let mut refs: Vec<Buffer> = (0..3).map(|_| buffer.retain()).collect();
        refs.push(buffer);
        let barrier = std::sync::Barrier::new(refs.len());

        let lasts = std::thread::scope(|s| {
            let workers: Vec<_> = refs
                .into_iter()
                .map(|buffer| {
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        buffer.release()
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(|&last| last)
                .count()
        });
        assert_eq!(lasts, 1);
    }
    ctx.default_pool().trim().unwrap();
    assert_eq!(ctx.default_pool().limits().total_size(), 0);
}
