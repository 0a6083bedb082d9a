//! Practice rounds: submit an attempt, score it against the job's baseline,
//! and record the result as the session's rewrite metrics.

use inkly_core::MetricSet;
use inkly_protocol::JobClient;
use inkly_session::MetricsSession;

use crate::{AppError, run_blocking};

/// Runs practice rounds and keeps the latest attempt for re-scoring.
///
/// Only the most recent round is retained; earlier attempts and scores are
/// replaced.
#[derive(Debug, Clone, Default)]
pub struct PracticeRoundController {
    latest_attempt: Option<Vec<u8>>,
}

impl PracticeRoundController {
    /// Creates a controller with no stored attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest submitted attempt.
    pub fn latest_attempt(&self) -> Option<&[u8]> {
        self.latest_attempt.as_deref()
    }

    /// Drops the stored attempt.
    pub fn forget(&mut self) {
        self.latest_attempt = None;
    }

    /// Scores `png` against `job_id` and records it as the rewrite set.
    ///
    /// The attempt is stored before the call so a failed round can be
    /// re-scored with [`PracticeRoundController::rescore_latest`].
    ///
    /// # Errors
    /// Propagates protocol errors; `ok == false` surfaces as
    /// [`inkly_protocol::ClientError::ServerRejected`]. `metrics` is untouched
    /// on failure.
    pub async fn run_round(
        &mut self,
        client: &JobClient,
        png: Vec<u8>,
        job_id: &str,
        metrics: &mut MetricsSession,
    ) -> Result<MetricSet, AppError> {
        self.latest_attempt = Some(png.clone());
        submit(client, png, job_id, metrics).await
    }

    /// Re-submits the latest attempt.
    ///
    /// # Errors
    /// Returns [`AppError::InvalidInput`] when no attempt was stored, and the
    /// same errors as [`PracticeRoundController::run_round`] otherwise.
    pub async fn rescore_latest(
        &self,
        client: &JobClient,
        job_id: &str,
        metrics: &mut MetricsSession,
    ) -> Result<MetricSet, AppError> {
        let Some(png) = self.latest_attempt.clone() else {
            return Err(AppError::InvalidInput(
                "no practice attempt to re-analyze".to_string(),
            ));
        };
        submit(client, png, job_id, metrics).await
    }

    /// Fetches the canvas underlay for `job_id`, or the default underlay.
    ///
    /// # Errors
    /// Propagates download and image contract errors.
    pub async fn load_background(
        &self,
        client: &JobClient,
        job_id: Option<&str>,
    ) -> Result<Vec<u8>, AppError> {
        let client = client.clone();
        let job_id = job_id.map(str::to_string);
        run_blocking(move || client.fetch_practice_background(job_id.as_deref())).await
    }
}

async fn submit(
    client: &JobClient,
    png: Vec<u8>,
    job_id: &str,
    metrics: &mut MetricsSession,
) -> Result<MetricSet, AppError> {
    let client = client.clone();
    let request_job_id = job_id.to_string();
    let outcome = run_blocking(move || client.reanalyze(&png, &request_job_id)).await?;

    metrics.reset_for_job(job_id);
    metrics.record_rewrite(outcome.metrics.clone());
    tracing::info!(
        job_id,
        scored = outcome.metrics.len(),
        average = metrics.average_similarity(),
        "practice round scored"
    );
    Ok(outcome.metrics)
}
