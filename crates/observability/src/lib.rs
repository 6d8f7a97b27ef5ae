//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide logging with the format named by `TORQUE_LOG_FORMAT`
/// (`json` by default, `pretty` for local runs).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::LogFormat;
