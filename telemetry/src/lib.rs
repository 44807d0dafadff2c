//! Tracing initialization shared by the sluice binaries.

use tracing_subscriber::EnvFilter;

/// Output format for emitted traces.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Human-readable single-line output for local development.
    Pretty,
    /// Newline-delimited JSON for log aggregation in production.
    Json,
}

/// Initializes the global tracing subscriber.
///
/// The filter honors `RUST_LOG` and falls back to the given default directive
/// (typically the binary name at `info`). Calling this twice panics, so it
/// belongs at the very top of `main`.
pub fn init_tracing(default_directive: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .init();
        }
    }
}
