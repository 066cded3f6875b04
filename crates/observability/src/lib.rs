//! Process-wide tracing setup.

pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize tracing from `RUST_LOG` / `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    self::tracing::init(LogFormat::from_env());
}
