//! Shared helpers for the compiler integration tests

#![allow(dead_code)]

use std::sync::Once;

use midl_typeformat::types::{Field, TypeArena, TypeId};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static TRACING: Once = Once::new();

/// Route compiler logs to the test output
pub fn init_tracing() {
    TRACING.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Add an interface `name` holding one function `F(params) -> ret`
pub fn interface_with(
    arena: &mut TypeArena,
    name: &str,
    ret: TypeId,
    params: Vec<Field>,
) -> (TypeId, TypeId) {
    let iface = arena.interface(name, None, vec![]);
    let function = arena.function("F", ret, params, vec![]);
    arena.add_function(iface, function);
    (iface, function)
}

/// Absolute offset a relative offset field at `at` points to
pub fn follow(bytes: &[u8], at: usize) -> usize {
    let relative = i16::from_le_bytes([bytes[at], bytes[at + 1]]);
    (at as i64 + relative as i64) as usize
}
