// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Provider creation and decorator composition through the public API.

use memory_provider::{
    create, InitProvider, MemoryAdvice, MemoryProvider, ProviderError, SystemProvider,
    SystemProviderParams, TracingProvider, UsmType,
};
use std::ptr::NonNull;

/// A backend that always fails to initialize with the error it is given.
#[derive(Debug)]
struct FailingProvider;

impl InitProvider for FailingProvider {
    type Params = ProviderError;

    fn initialize(error: ProviderError) -> Result<Self, ProviderError> {
        Err(error)
    }
}

impl MemoryProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }
    fn alloc(&self, _: usize, _: usize) -> Result<NonNull<u8>, ProviderError> {
        unreachable!()
    }
    unsafe fn free(&self, _: NonNull<u8>, _: usize) -> Result<(), ProviderError> {
        unreachable!()
    }
    fn set_attrs(&self, _: NonNull<u8>, _: usize, _: MemoryAdvice) -> Result<(), ProviderError> {
        unreachable!()
    }
    fn last_result(&self) -> Option<ProviderError> {
        None
    }
}

#[test]
fn test_initialization_errors_propagate() {
    let errors = [
        ProviderError::OutOfMemory {
            requested: 0,
            available: 0,
        },
        ProviderError::Specific("backend".into()),
        ProviderError::InvalidArgument("params".into()),
        ProviderError::Initialization("unknown".into()),
    ];
    for error in errors {
        let result = create::<FailingProvider>(error.clone());
        assert_eq!(result.unwrap_err(), error);
    }
}

#[test]
fn test_tracing_over_system_counts_real_traffic() {
    let system = create::<SystemProvider>(SystemProviderParams::new(UsmType::Host)).unwrap();
    let traced = TracingProvider::new(system);

    let ptrs: Vec<_> = (0..4).map(|_| traced.alloc(512, 0).unwrap()).collect();
    for p in ptrs {
        unsafe { traced.free(p, 512).unwrap() };
    }

    assert_eq!(traced.calls("alloc"), 4);
    assert_eq!(traced.calls("free"), 4);
    assert!(traced.host_accessible());
}

#[test]
fn test_stacked_decorators() {
    let system = create::<SystemProvider>(SystemProviderParams::new(UsmType::Shared)).unwrap();
    let inner = create::<TracingProvider>(system).unwrap();
    let outer = TracingProvider::new(inner.clone());

    let ptr = outer.alloc(64, 0).unwrap();
    unsafe { outer.free(ptr, 64).unwrap() };

    assert_eq!(outer.calls("alloc"), 1);
    assert_eq!(outer.calls("free"), 1);
    assert!(inner.last_result().is_none());
}
