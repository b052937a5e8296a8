#![allow(dead_code)]

use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initializes `env_logger` once per test binary, so `RUST_LOG` can be
/// used to watch engine internals while debugging a failing test.
pub fn enable_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
