#![warn(missing_docs)]
//! # inkly-poller
//!
//! ## Purpose
//! Drives one generation job from the start request to a terminal outcome by
//! polling the server on a fixed interval.
//!
//! ## Responsibilities
//! - Start generation and translate the result into job lifecycle transitions.
//! - Poll status until done, error, budget exhaustion or cancellation.
//! - Record transient problems as notices instead of failing the run.
//!
//! ## Data flow
//! [`GenerationPoller::run`] -> [`GenerationApi`] on a blocking worker ->
//! [`GenerationStatus`] -> [`PollerState`] transition -> [`PollReport`].
//!
//! ## Ownership and lifetimes
//! The poller owns its API handle behind `Arc` and borrows the [`Job`]
//! mutably for the duration of a run. Only the poller moves a job past
//! `Uploading`.
//!
//! ## Error model
//! A run never returns an error. Every failure ends up in
//! [`GenerationOutcome`]; client errors raised while polling become
//! [`PollNotice`] entries and polling continues.
//!
//! ## Example
//! ```
//! use std::time::Duration;
//! use inkly_poller::PollerConfig;
//!
//! let config = PollerConfig {
//!     interval: Duration::from_secs(30),
//!     budget: Duration::from_secs(30 * 60),
//!     ..PollerConfig::default()
//! };
//! assert_eq!(config.max_polls(), 60);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use inkly_core::{ArtifactReference, GenerationState, GenerationStatus, Job, JobState};
use inkly_protocol::{ClientError, DEFAULT_LAMBDAS, GenerationAck, JobClient};
use tokio::sync::{mpsc, watch};

/// Default pause between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default total polling budget.
pub const DEFAULT_POLL_BUDGET: Duration = Duration::from_secs(30 * 60);

/// User-facing message attached to a timed out run.
pub const TIMED_OUT_MESSAGE: &str = "generation is taking too long; please try again later";

/// Fallback message for a server error state without text.
pub const GENERATION_FAILED_MESSAGE: &str = "generation failed";

const CANCELLED_MESSAGE: &str = "generation cancelled";
const MISSING_REPRESENTATIVE_MESSAGE: &str =
    "generation finished without a representative artifact";

/// Blocking server operations the poller needs.
pub trait GenerationApi: Send + Sync {
    /// Requests generation for an uploaded sample.
    fn start_generation(
        &self,
        filename: &str,
        job_id: &str,
        lambdas: [f64; 5],
    ) -> Result<GenerationAck, ClientError>;

    /// Fetches one status snapshot.
    fn poll_status(&self, job_id: &str) -> Result<GenerationStatus, ClientError>;
}

impl GenerationApi for JobClient {
    fn start_generation(
        &self,
        filename: &str,
        job_id: &str,
        lambdas: [f64; 5],
    ) -> Result<GenerationAck, ClientError> {
        JobClient::start_generation(self, filename, job_id, lambdas)
    }

    fn poll_status(&self, job_id: &str) -> Result<GenerationStatus, ClientError> {
        JobClient::poll_status(self, job_id)
    }
}

/// Source of delays between polls.
pub trait Sleeper: Send + Sync {
    /// Completes after `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Poll timing and policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Pause before each status poll.
    pub interval: Duration,
    /// Total time allowed for polling.
    pub budget: Duration,
    /// Consecutive "done without representative" answers tolerated before
    /// the run fails. `None` tolerates them until the budget runs out.
    pub missing_representative_limit: Option<u32>,
    /// Style-interpolation weights sent with the start request.
    pub lambdas: [f64; 5],
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            budget: DEFAULT_POLL_BUDGET,
            missing_representative_limit: None,
            lambdas: DEFAULT_LAMBDAS,
        }
    }
}

impl PollerConfig {
    /// Number of polls the budget allows: `ceil(budget / interval)`.
    ///
    /// A zero interval is treated as one millisecond.
    pub fn max_polls(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        let polls = self.budget.as_millis().div_ceil(interval);
        u32::try_from(polls).unwrap_or(u32::MAX)
    }
}

/// Observable poller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    /// Nothing started yet.
    Idle,
    /// Start request in flight.
    Starting,
    /// Waiting for or issuing status poll number `attempt` (1-based).
    Polling {
        /// Poll counter.
        attempt: u32,
    },
    /// Representative artifact is available.
    Done(ArtifactReference),
    /// Start or generation failed.
    Error(String),
    /// Budget ran out.
    TimedOut,
    /// Run was cancelled by the caller.
    Cancelled,
}

impl PollerState {
    /// Returns `true` for states that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done(_) | Self::Error(_) | Self::TimedOut | Self::Cancelled
        )
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Generation finished with this representative artifact.
    Done(ArtifactReference),
    /// Start request or server-side generation failed.
    Error(String),
    /// Budget ran out before the server finished.
    TimedOut,
    /// Caller cancelled the run.
    Cancelled,
}

impl GenerationOutcome {
    /// Message suitable for the user, `None` on success.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Done(_) => None,
            Self::Error(message) => Some(message),
            Self::TimedOut => Some(TIMED_OUT_MESSAGE),
            Self::Cancelled => Some(CANCELLED_MESSAGE),
        }
    }

    fn as_state(&self) -> PollerState {
        match self {
            Self::Done(path) => PollerState::Done(path.clone()),
            Self::Error(message) => PollerState::Error(message.clone()),
            Self::TimedOut => PollerState::TimedOut,
            Self::Cancelled => PollerState::Cancelled,
        }
    }
}

/// Transient problem observed while polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollNotice {
    /// Poll number the notice belongs to.
    pub attempt: u32,
    /// What happened.
    pub kind: NoticeKind,
}

/// Notice categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    /// Server reported `done` without a usable representative path.
    MissingRepresentative,
    /// Status request failed.
    Request(ClientError),
    /// Blocking worker did not complete.
    Worker(String),
}

impl fmt::Display for PollNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NoticeKind::MissingRepresentative => write!(
                f,
                "poll {}: generation reported done without a representative; still waiting",
                self.attempt
            ),
            NoticeKind::Request(error) => write!(f, "poll {}: {error}", self.attempt),
            NoticeKind::Worker(message) => {
                write!(f, "poll {}: status worker failed: {message}", self.attempt)
            }
        }
    }
}

/// Live update streamed to an optional observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Poller moved to a new state.
    State(PollerState),
    /// Transient notice.
    Notice(PollNotice),
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Terminal outcome.
    pub outcome: GenerationOutcome,
    /// Status polls actually sent.
    pub polls_issued: u32,
    /// Transient notices in order of occurrence.
    pub notices: Vec<PollNotice>,
}

/// Caller side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Poller side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Completes once cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        if rx.wait_for(|flag| *flag).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a linked cancel handle and token.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx: Some(rx) })
}

/// Generation state machine for one job at a time.
pub struct GenerationPoller<S = TokioSleeper> {
    api: Arc<dyn GenerationApi>,
    sleeper: S,
    config: PollerConfig,
    events: Option<mpsc::UnboundedSender<PollEvent>>,
}

impl GenerationPoller<TokioSleeper> {
    /// Creates a poller that sleeps on the tokio timer.
    pub fn new(api: Arc<dyn GenerationApi>, config: PollerConfig) -> Self {
        Self::with_sleeper(api, config, TokioSleeper)
    }
}

impl<S: Sleeper> GenerationPoller<S> {
    /// Creates a poller with an injected sleeper.
    pub fn with_sleeper(api: Arc<dyn GenerationApi>, config: PollerConfig, sleeper: S) -> Self {
        Self {
            api,
            sleeper,
            config,
            events: None,
        }
    }

    /// Streams state changes and notices to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PollEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs generation for `job` to a terminal outcome.
    ///
    /// `job` must be `Uploading` with an assigned id. It ends `Ready` when the
    /// outcome is [`GenerationOutcome::Done`] and `Failed` otherwise. A job in
    /// any other state yields [`GenerationOutcome::Error`] without a server
    /// call.
    pub async fn run(&self, job: &mut Job, cancel: &mut CancelToken) -> PollReport {
        let mut report = PollReport {
            outcome: GenerationOutcome::Cancelled,
            polls_issued: 0,
            notices: Vec::new(),
        };
        let outcome = self.drive(job, cancel, &mut report).await;
        report.outcome = outcome;
        self.finish(job, &report);
        report
    }

    async fn drive(
        &self,
        job: &mut Job,
        cancel: &mut CancelToken,
        report: &mut PollReport,
    ) -> GenerationOutcome {
        if cancel.is_cancelled() {
            return GenerationOutcome::Cancelled;
        }
        if let Err(error) = job.advance(JobState::GenerationRequested) {
            return GenerationOutcome::Error(format!("job cannot start generation: {error}"));
        }
        let job_id = job.id().unwrap_or_default().to_string();
        let filename = job.source_filename().to_string();

        self.emit(PollEvent::State(PollerState::Starting));
        tracing::info!(job_id = %job_id, filename = %filename, "requesting generation");
        let api = Arc::clone(&self.api);
        let lambdas = self.config.lambdas;
        let start_job_id = job_id.clone();
        let started = tokio::task::spawn_blocking(move || {
            api.start_generation(&filename, &start_job_id, lambdas)
        })
        .await;
        match started {
            Ok(Ok(ack)) => {
                tracing::info!(job_id = %ack.job_id, state = ?ack.state, "generation accepted");
            }
            Ok(Err(error)) => {
                tracing::warn!(job_id = %job_id, %error, "generation start failed");
                return GenerationOutcome::Error(error.to_string());
            }
            Err(error) => {
                return GenerationOutcome::Error(format!("generation start worker failed: {error}"));
            }
        }
        if let Err(error) = job.advance(JobState::Polling) {
            return GenerationOutcome::Error(error.to_string());
        }

        let max_polls = self.config.max_polls();
        let mut missing_streak = 0_u32;
        while report.polls_issued < max_polls {
            tokio::select! {
                _ = self.sleeper.sleep(self.config.interval) => {}
                _ = cancel.cancelled() => return GenerationOutcome::Cancelled,
            }
            if cancel.is_cancelled() {
                return GenerationOutcome::Cancelled;
            }

            report.polls_issued += 1;
            let attempt = report.polls_issued;
            self.emit(PollEvent::State(PollerState::Polling { attempt }));

            let api = Arc::clone(&self.api);
            let poll_job_id = job_id.clone();
            let polled = tokio::task::spawn_blocking(move || api.poll_status(&poll_job_id)).await;
            let status = match polled {
                Ok(Ok(status)) => status,
                Ok(Err(error)) => {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        class = ?error.failure_class(),
                        %error,
                        "status poll failed; will retry"
                    );
                    self.notice(report, attempt, NoticeKind::Request(error));
                    continue;
                }
                Err(error) => {
                    tracing::warn!(job_id = %job_id, attempt, %error, "status worker failed");
                    self.notice(report, attempt, NoticeKind::Worker(error.to_string()));
                    continue;
                }
            };

            match status.state {
                GenerationState::Done => match status.representative {
                    Some(representative) => {
                        tracing::info!(
                            job_id = %job_id,
                            attempt,
                            %representative,
                            "generation done"
                        );
                        return GenerationOutcome::Done(representative);
                    }
                    None => {
                        missing_streak += 1;
                        tracing::warn!(
                            job_id = %job_id,
                            attempt,
                            missing_streak,
                            "generation done without a representative"
                        );
                        self.notice(report, attempt, NoticeKind::MissingRepresentative);
                        if self
                            .config
                            .missing_representative_limit
                            .is_some_and(|limit| missing_streak >= limit)
                        {
                            return GenerationOutcome::Error(
                                MISSING_REPRESENTATIVE_MESSAGE.to_string(),
                            );
                        }
                    }
                },
                GenerationState::Error => {
                    let message = status
                        .error
                        .unwrap_or_else(|| GENERATION_FAILED_MESSAGE.to_string());
                    tracing::warn!(job_id = %job_id, attempt, %message, "generation failed");
                    return GenerationOutcome::Error(message);
                }
                GenerationState::Unrecognized(raw) => {
                    missing_streak = 0;
                    tracing::debug!(job_id = %job_id, attempt, state = %raw, "unrecognized state");
                }
                GenerationState::Running | GenerationState::None => {
                    missing_streak = 0;
                    tracing::debug!(job_id = %job_id, attempt, "generation still running");
                }
            }
        }

        tracing::warn!(job_id = %job_id, polls = report.polls_issued, "polling budget exhausted");
        GenerationOutcome::TimedOut
    }

    fn finish(&self, job: &mut Job, report: &PollReport) {
        let applied = match &report.outcome {
            GenerationOutcome::Done(representative) => job.mark_ready(representative.clone()),
            other => {
                if job.state().is_terminal() {
                    Ok(())
                } else {
                    job.mark_failed(other.user_message().unwrap_or(GENERATION_FAILED_MESSAGE))
                }
            }
        };
        if let Err(error) = applied {
            tracing::error!(%error, "job transition rejected after generation run");
        }
        self.emit(PollEvent::State(report.outcome.as_state()));
    }

    fn notice(&self, report: &mut PollReport, attempt: u32, kind: NoticeKind) {
        let notice = PollNotice { attempt, kind };
        self.emit(PollEvent::Notice(notice.clone()));
        report.notices.push(notice);
    }

    fn emit(&self, event: PollEvent) {
        if let Some(events) = &self.events {
            // Receiver may be gone; the run continues without an observer.
            let _ = events.send(event);
        }
    }
}
