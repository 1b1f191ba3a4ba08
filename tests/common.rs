#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, OnceLock};

use rtmap::config::{BlinkConfig, BoardConfig, IsolationConfig};

/// Global mutex to serialize integration tests that share mutable fixtures.
pub fn serial() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|err| err.into_inner())
}

/// Bundled board with millisecond phases and no isolation, so a full run
/// finishes quickly on any host without privileges.
pub fn fast_config() -> BoardConfig {
    let mut config = BoardConfig::builtin().expect("bundled board parses");
    config.run.producer = BlinkConfig { on_ms: 1, off_ms: 1 };
    config.run.consumer = BlinkConfig { on_ms: 1, off_ms: 0 };
    config.run.mapping.on_ms = 1;
    config.run.mapping.off_ms = 1;
    config.run.start.settle_ms = 0;
    config.isolation = IsolationConfig::disabled();
    config
}
