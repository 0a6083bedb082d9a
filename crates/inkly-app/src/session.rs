//! Per-user workflow context.
//!
//! A [`Session`] owns one protocol client, the active job, its metrics and the
//! practice controller. Nothing here is global; callers create as many
//! sessions as they need.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use inkly_core::{
    ArtifactReference, DerivedJobId, Job, JobIdOrigin, JobState, MetricSet, derive_job_id,
};
use inkly_poller::{
    CancelToken, GenerationOutcome, GenerationPoller, PollEvent, PollReport, PollerConfig,
};
use inkly_protocol::{JobClient, validate_upload_filename};
use inkly_session::MetricsSession;
use inkly_transport::Transport;
use tokio::sync::mpsc;

use crate::fanout::{ResultSet, fetch_result_set};
use crate::practice::PracticeRoundController;
use crate::{AppConfig, AppError, run_blocking};

/// Workflow context for one user.
pub struct Session {
    client: JobClient,
    poller_config: PollerConfig,
    job: Option<Job>,
    metrics: MetricsSession,
    practice: PracticeRoundController,
    last_report: Option<PollReport>,
}

impl Session {
    /// Creates a session over an existing client.
    pub fn new(client: JobClient, poller_config: PollerConfig) -> Self {
        Self {
            client,
            poller_config,
            job: None,
            metrics: MetricsSession::new(),
            practice: PracticeRoundController::new(),
            last_report: None,
        }
    }

    /// Creates a session talking HTTP through `ureq`.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] when the base URL is unusable.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let transport = Transport::with_ureq(config.transport_config()?);
        Ok(Self::new(JobClient::new(transport), config.poller_config()))
    }

    /// Protocol client.
    pub fn client(&self) -> &JobClient {
        &self.client
    }

    /// Active job.
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// Scores of the active job.
    pub fn metrics(&self) -> &MetricsSession {
        &self.metrics
    }

    /// Report of the latest generation run.
    pub fn last_report(&self) -> Option<&PollReport> {
        self.last_report.as_ref()
    }

    /// Uploads a handwriting sample and starts tracking a new job.
    ///
    /// The job id comes from the server, else from the stored filename, else
    /// from the clock (logged as a warning).
    ///
    /// # Errors
    /// Returns [`inkly_protocol::ClientError::InvalidInput`] before any job or
    /// request is created when the filename is unusable. Propagates upload
    /// errors; the failed job then stays available through [`Session::job`]
    /// in the `Failed` state.
    pub async fn submit_sample(
        &mut self,
        png: Vec<u8>,
        filename: &str,
    ) -> Result<DerivedJobId, AppError> {
        let filename = validate_upload_filename(filename)?;
        let mut job = Job::new(filename)?;
        job.begin_upload()?;

        let client = self.client.clone();
        let upload_name = filename.to_string();
        let uploaded = run_blocking(move || client.upload(&png, &upload_name)).await;
        let uploaded = match uploaded {
            Ok(uploaded) => uploaded,
            Err(error) => {
                job.mark_failed(error.to_string())?;
                self.job = Some(job);
                return Err(error);
            }
        };

        let derived = derive_job_id(
            &uploaded.filename,
            uploaded.job_id.as_deref(),
            unix_now_secs,
        );
        match derived.origin {
            JobIdOrigin::Server => {}
            JobIdOrigin::Filename => {
                tracing::info!(
                    job_id = %derived.id,
                    filename = %uploaded.filename,
                    "job id derived from filename"
                );
            }
            JobIdOrigin::Clock => {
                tracing::warn!(
                    job_id = %derived.id,
                    "job id derived from the clock; server may not recognize it"
                );
            }
        }

        job.assign_upload(uploaded.filename, derived.id.clone())?;
        self.metrics.reset_for_job(&derived.id);
        self.practice.forget();
        self.last_report = None;
        self.job = Some(job);
        Ok(derived)
    }

    /// Runs generation for the active job until it finishes.
    ///
    /// # Errors
    /// Returns [`AppError::NoActiveJob`] without a job,
    /// [`AppError::GenerationFailed`], [`AppError::Timeout`] or
    /// [`AppError::Cancelled`] for unsuccessful runs.
    pub async fn generate(
        &mut self,
        cancel: &mut CancelToken,
        events: Option<mpsc::UnboundedSender<PollEvent>>,
    ) -> Result<ArtifactReference, AppError> {
        let job = self.job.as_mut().ok_or(AppError::NoActiveJob)?;

        let api = Arc::new(self.client.clone());
        let mut poller = GenerationPoller::new(api, self.poller_config.clone());
        if let Some(events) = events {
            poller = poller.with_events(events);
        }
        let report = poller.run(job, cancel).await;

        let result = match &report.outcome {
            GenerationOutcome::Done(representative) => Ok(representative.clone()),
            GenerationOutcome::Error(message) => Err(AppError::GenerationFailed(message.clone())),
            GenerationOutcome::TimedOut => Err(AppError::Timeout(
                report
                    .outcome
                    .user_message()
                    .unwrap_or_default()
                    .to_string(),
            )),
            GenerationOutcome::Cancelled => Err(AppError::Cancelled),
        };
        self.last_report = Some(report);
        result
    }

    /// Scores the finished job and records the base metrics.
    ///
    /// # Errors
    /// Returns [`AppError::JobNotReady`] unless generation finished; protocol
    /// errors otherwise.
    pub async fn analyze_base(&mut self) -> Result<MetricSet, AppError> {
        let job_id = self.ready_job()?.0;
        let client = self.client.clone();
        let request_job_id = job_id.clone();
        let outcome = run_blocking(move || client.analyze(&request_job_id, None)).await?;

        self.metrics.reset_for_job(&job_id);
        self.metrics.record_base(outcome.metrics.clone());
        tracing::info!(
            job_id = %job_id,
            analyze_type = ?outcome.analyze_type,
            average = self.metrics.average_similarity(),
            "base metrics recorded"
        );
        Ok(outcome.metrics)
    }

    /// Downloads the representative and character slots of the finished job.
    ///
    /// # Errors
    /// Returns [`AppError::JobNotReady`] unless generation finished, and the
    /// representative download failure.
    pub async fn fetch_results(&self) -> Result<ResultSet, AppError> {
        let (job_id, representative) = self.ready_job()?;
        fetch_result_set(&self.client, &job_id, &representative).await
    }

    /// Runs one practice round against the active job.
    ///
    /// # Errors
    /// Returns [`AppError::NoActiveJob`] without an uploaded job; practice
    /// errors otherwise.
    pub async fn practice(&mut self, png: Vec<u8>) -> Result<MetricSet, AppError> {
        let job_id = self.active_job_id()?;
        self.practice
            .run_round(&self.client, png, &job_id, &mut self.metrics)
            .await
    }

    /// Re-scores the latest practice attempt.
    ///
    /// # Errors
    /// Returns [`AppError::InvalidInput`] when no attempt was made.
    pub async fn rescore_practice(&mut self) -> Result<MetricSet, AppError> {
        let job_id = self.active_job_id()?;
        self.practice
            .rescore_latest(&self.client, &job_id, &mut self.metrics)
            .await
    }

    /// Fetches the practice canvas underlay for the active job.
    ///
    /// # Errors
    /// Returns [`AppError::NoActiveJob`] without an uploaded job.
    pub async fn practice_background(&self) -> Result<Vec<u8>, AppError> {
        let job_id = self.active_job_id()?;
        self.practice
            .load_background(&self.client, Some(&job_id))
            .await
    }

    fn active_job_id(&self) -> Result<String, AppError> {
        self.job
            .as_ref()
            .and_then(Job::id)
            .map(str::to_string)
            .ok_or(AppError::NoActiveJob)
    }

    fn ready_job(&self) -> Result<(String, ArtifactReference), AppError> {
        let job = self.job.as_ref().ok_or(AppError::NoActiveJob)?;
        match (job.state(), job.id(), job.representative()) {
            (JobState::Ready, Some(id), Some(representative)) => {
                Ok((id.to_string(), representative.clone()))
            }
            (state, _, _) => Err(AppError::JobNotReady { state }),
        }
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
