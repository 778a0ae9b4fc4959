//! Minimal `tracing-subscriber` initializer.
//!
//! No OpenTelemetry/OTLP exporter is wired here; a remote trace sink is the
//! embedder's concern, not the kernel's.

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber. `level_override` wins over `RUST_LOG`,
/// which wins over `LOG_LEVEL`, which falls back to `"info"`.
///
/// Returns `Err` if a global subscriber is already installed; safe to ignore
/// in tests that call this more than once within a process.
pub fn init_logging(level_override: Option<&str>) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = level_override
        .map(ToString::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
