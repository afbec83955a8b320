//! Logging configuration with journald support on Linux.
//!
//! This module sets up tracing-based logging that integrates with systemd's
//! journal on Linux systems, with a stderr fallback for other platforms or
//! when journald is unavailable.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// On Linux, this will attempt to connect to systemd-journald.
/// If unavailable or on other platforms, logs go to stderr.
///
/// Log level can be controlled via the `SCENERANK_LOG` environment variable:
/// - `SCENERANK_LOG=debug` for verbose output
/// - `SCENERANK_LOG=info` for standard output (default)
/// - `SCENERANK_LOG=warn` for warnings and errors only
/// - `SCENERANK_LOG=error` for errors only
pub fn init() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("SCENERANK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        // Try to use journald on Linux
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .init();

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
