//! Centralized logging configuration for demos and tests.
//!
//! Provides a consistent `tracing` subscriber setup with a default INFO
//! level, overrideable through the `RUST_LOG` environment variable.

use tracing::Level;

/// Initialize the tracing subscriber with the library's standard configuration.
///
/// Default log level: INFO (overrideable via `RUST_LOG`).
///
/// # Example
/// ```no_run
/// use maxmix_factors::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("factor graph assembly started");
/// }
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via `RUST_LOG`)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .init();
}
