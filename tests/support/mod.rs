#![allow(dead_code)]

pub mod fixtures;
pub mod mock_extractor;

use std::time::{Duration, Instant};

pub use fixtures::*;
pub use mock_extractor::CountingExtractor;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("trackfs=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
