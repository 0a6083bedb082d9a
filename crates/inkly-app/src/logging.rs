//! Logging setup and log-safe text helpers.

use tracing_subscriber::EnvFilter;

use crate::AppError;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

const SECRET_MARKERS: [&str; 4] = ["x-api-key", "api_key", "apikey", "authorization"];

/// Installs the global `tracing` subscriber writing to stderr.
///
/// Honors `RUST_LOG`; falls back to [`DEFAULT_LOG_FILTER`].
///
/// # Errors
/// Returns [`AppError::Logging`] when a global subscriber is already set.
pub fn init_logging() -> Result<(), AppError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|error| AppError::Logging(error.to_string()))
}

/// Redacts everything after the first API key or authorization marker.
pub fn redact_sensitive(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let first = SECRET_MARKERS
        .iter()
        .filter_map(|marker| lower.find(marker).map(|position| (position, *marker)))
        .min_by_key(|(position, _)| *position);

    match first {
        Some((position, marker)) => format!("{}{marker}=<redacted>", &input[..position]),
        None => input.to_string(),
    }
}
