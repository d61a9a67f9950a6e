//! Tracing and logging (shared setup).

pub mod logging;

pub use logging::{init_for_tests, init_with, try_init_with, LogConfig, LogConfigError, LogFormat};

/// Initialize process-wide logging from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init();
}
