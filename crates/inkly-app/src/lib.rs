#![warn(missing_docs)]
//! # inkly-app
//!
//! ## Purpose
//! Wires the protocol client, generation poller and metrics session into one
//! handwriting practice workflow, and hosts the `inkly` command line.
//!
//! ## Responsibilities
//! - Load configuration from the environment ([`config`]).
//! - Install structured logging with secret redaction ([`logging`]).
//! - Own the per-user workflow context ([`session::Session`]).
//! - Run practice rounds against an existing job ([`practice`]).
//! - Download a finished job's artifacts concurrently ([`fanout`]).
//!
//! ## Data flow
//! upload -> job id derivation -> generation poller -> analyze (base metrics)
//! -> result set download -> practice rounds (rewrite metrics) -> display.
//!
//! ## Ownership and lifetimes
//! [`session::Session`] owns one client, the active job and its metrics.
//! Blocking protocol calls run on tokio's blocking pool with cloned client
//! handles so the async runtime never stalls on I/O.
//!
//! ## Error model
//! Every workflow step returns [`AppError`], which wraps the subsystem
//! errors and adds workflow-level failures such as a timed out generation.
//!
//! ## Security and privacy notes
//! - The API key never appears in logs; see [`logging::redact_sensitive`].
//! - Non-HTTPS base URLs are accepted for local servers but logged as a
//!   warning.

pub mod config;
pub mod fanout;
pub mod logging;
pub mod practice;
pub mod session;

use std::path::PathBuf;

use inkly_core::{CoreError, JobState};
use inkly_protocol::ClientError;
use thiserror::Error;
use url::Url;

pub use config::{AppConfig, ConfigError};
pub use fanout::{ResultSet, fetch_result_set};
pub use logging::{init_logging, redact_sensitive};
pub use practice::PracticeRoundController;
pub use session::Session;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("INKLY_VERSION");

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Returns `true` when the endpoint URL uses HTTPS.
pub fn is_https_endpoint(endpoint: &str) -> bool {
    Url::parse(endpoint)
        .map(|url| url.scheme() == "https")
        .unwrap_or(false)
}

/// Runs a blocking protocol call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(call: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ClientError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|error| AppError::Worker(error.to_string()))?
        .map_err(AppError::from)
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Protocol call failed.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Job model rejected an operation.
    #[error("job error: {0}")]
    Core(#[from] CoreError),
    /// Caller input was rejected before any request.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation needs an uploaded job.
    #[error("no active job; submit a sample first")]
    NoActiveJob,
    /// Operation needs a job with a finished generation.
    #[error("job is {state:?}, generation has not finished")]
    JobNotReady {
        /// Current job state.
        state: JobState,
    },
    /// Generation failed to start or failed on the server.
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    /// Polling budget ran out.
    #[error("{0}")]
    Timeout(String),
    /// Generation run was cancelled.
    #[error("generation cancelled")]
    Cancelled,
    /// Blocking worker panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(String),
    /// Logging could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
    /// Local file could not be read or written.
    #[error("file I/O failed for {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Output document could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for app helpers.

    use super::*;

    #[tokio::test]
    async fn blocking_errors_keep_client_variant() {
        let result: Result<(), AppError> =
            run_blocking(|| Err(ClientError::InvalidInput("empty".to_string()))).await;
        assert!(matches!(
            result,
            Err(AppError::Client(ClientError::InvalidInput(_)))
        ));
    }

    #[tokio::test]
    async fn blocking_success_passes_value_through() {
        let value = run_blocking(|| Ok::<_, ClientError>(7_u8))
            .await
            .expect("call should succeed");
        assert_eq!(value, 7);
    }

    #[test]
    fn io_errors_name_the_path() {
        let error = AppError::io(
            "out/representative.png",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(error, AppError::Io { .. }));
        assert_eq!(
            error.to_string(),
            "file I/O failed for out/representative.png: denied"
        );
    }

    #[test]
    fn json_failures_convert_to_serialization_errors() {
        let failure = serde_json::from_str::<serde_json::Value>("{").expect_err("truncated");
        let error = AppError::from(failure);
        assert!(matches!(error, AppError::Serialization(_)));
    }
}
