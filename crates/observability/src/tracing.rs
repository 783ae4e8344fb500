//! Tracing/logging initialization.
//!
//! The filter comes from `RUST_LOG` and falls back to `info`. The infra
//! crate records `operation`-level spans, so `RUST_LOG=stockflow_infra=debug`
//! shows every per-line decision of a movement batch.

use core::str::FromStr;

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

/// Output format of the fmt subscriber.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    #[default]
    Json,
    /// Human-readable lines for a terminal.
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    // Logs go to stderr so command output on stdout stays machine-readable.
    let _ = match format {
        LogFormat::Json => builder.json().with_writer(std::io::stderr).try_init(),
        LogFormat::Text => builder.with_writer(std::io::stderr).try_init(),
    };
}
