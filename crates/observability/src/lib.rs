//! Tracing and logging setup shared by payqueue binaries.

/// Log output configuration.
pub mod logging;

pub use logging::{LogConfig, LogFormat};

/// Initialize process-wide logging from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() -> bool {
    logging::init(&LogConfig::from_env())
}
