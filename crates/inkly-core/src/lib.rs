#![warn(missing_docs)]
//! # inkly-core
//!
//! ## Purpose
//! Defines the pure data model used across the `inkly` workspace.
//!
//! ## Responsibilities
//! - Represent a generation [`Job`] and its legal lifecycle transitions.
//! - Represent poll snapshots ([`GenerationStatus`]) and artifact paths.
//! - Hold similarity scores in a fixed-vocabulary [`MetricSet`].
//! - Derive job ids when the server omits one ([`derive_job_id`]).
//!
//! ## Data flow
//! Upload responses become [`UploadResult`] values, which seed a [`Job`].
//! Status responses become [`GenerationStatus`] snapshots that drive the job
//! to `Ready` with an [`ArtifactReference`]. Analysis responses become
//! [`MetricSet`] values consumed by the metrics session.
//!
//! ## Ownership and lifetimes
//! All values own their strings so they can cross async task and blocking
//! thread boundaries without borrow coupling.
//!
//! ## Error model
//! Invalid lifecycle transitions and blank identifiers return [`CoreError`].
//! Unknown metric names and "not yet available" artifact paths are not
//! errors; they are filtered or reported as `None`.
//!
//! ## Example
//! ```rust
//! use inkly_core::{derive_job_id, ArtifactReference, JobIdOrigin};
//!
//! let derived = derive_job_id("abc_1.png", None, || 0);
//! assert_eq!(derived.id, "abc");
//! assert_eq!(derived.origin, JobIdOrigin::Filename);
//! assert!(ArtifactReference::parse("   /  ").is_none());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of per-character comparison slots produced for a finished job.
pub const CHARACTER_SLOT_COUNT: usize = 14;

/// Lifecycle state of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Job exists locally; nothing has been sent yet.
    Created,
    /// Sample upload is in flight or finished without a generation request.
    Uploading,
    /// Generation start request was sent.
    GenerationRequested,
    /// Waiting on the server through periodic status polls.
    Polling,
    /// Representative artifact is available.
    Ready,
    /// Job failed; no artifact will be produced.
    Failed,
}

impl JobState {
    /// Returns `true` for `Ready` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    fn can_advance_to(self, next: JobState) -> bool {
        match (self, next) {
            (from, Self::Failed) => !from.is_terminal(),
            (Self::Created, Self::Uploading)
            | (Self::Uploading, Self::GenerationRequested)
            | (Self::GenerationRequested, Self::Polling)
            | (Self::Polling, Self::Ready) => true,
            _ => false,
        }
    }
}

/// One server-side generation task tracked by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: Option<String>,
    source_filename: String,
    state: JobState,
    representative: Option<ArtifactReference>,
    failure: Option<String>,
}

impl Job {
    /// Creates a job for a sample that is about to be uploaded.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidFilename`] when `source_filename` is blank.
    pub fn new(source_filename: impl Into<String>) -> Result<Self, CoreError> {
        let source_filename = source_filename.into();
        if source_filename.trim().is_empty() {
            return Err(CoreError::InvalidFilename(source_filename));
        }

        Ok(Self {
            id: None,
            source_filename,
            state: JobState::Created,
            representative: None,
            failure: None,
        })
    }

    /// Returns the job id once the upload has been accepted.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the source artifact filename known to the server.
    pub fn source_filename(&self) -> &str {
        &self.source_filename
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Returns the representative artifact of a `Ready` job.
    pub fn representative(&self) -> Option<&ArtifactReference> {
        self.representative.as_ref()
    }

    /// Returns the failure reason of a `Failed` job.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Marks the upload as started.
    ///
    /// # Errors
    /// Returns [`CoreError::IllegalTransition`] unless the job is `Created`.
    pub fn begin_upload(&mut self) -> Result<(), CoreError> {
        self.advance(JobState::Uploading)
    }

    /// Records the accepted upload: server filename and resolved job id.
    ///
    /// The job stays in `Uploading` until generation is requested.
    ///
    /// # Errors
    /// Returns [`CoreError::IllegalTransition`] unless the job is `Uploading`,
    /// and [`CoreError::InvalidJobId`] when `job_id` is blank.
    pub fn assign_upload(
        &mut self,
        filename: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Result<(), CoreError> {
        if self.state != JobState::Uploading {
            return Err(CoreError::IllegalTransition {
                from: self.state,
                to: JobState::Uploading,
            });
        }

        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            return Err(CoreError::InvalidJobId);
        }

        let filename = filename.into();
        if !filename.trim().is_empty() {
            self.source_filename = filename;
        }
        self.id = Some(job_id);
        Ok(())
    }

    /// Applies a lifecycle transition.
    ///
    /// # Errors
    /// Returns [`CoreError::IllegalTransition`] for transitions outside
    /// `Created -> Uploading -> GenerationRequested -> Polling -> Ready` and
    /// `* -> Failed` from a non-terminal state. Requesting generation without
    /// an assigned id returns [`CoreError::InvalidJobId`].
    pub fn advance(&mut self, next: JobState) -> Result<(), CoreError> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        if next == JobState::GenerationRequested && self.id.is_none() {
            return Err(CoreError::InvalidJobId);
        }

        self.state = next;
        Ok(())
    }

    /// Moves a polling job to `Ready` with its representative artifact.
    ///
    /// # Errors
    /// Returns [`CoreError::IllegalTransition`] unless the job is `Polling`.
    pub fn mark_ready(&mut self, representative: ArtifactReference) -> Result<(), CoreError> {
        self.advance(JobState::Ready)?;
        self.representative = Some(representative);
        Ok(())
    }

    /// Moves a non-terminal job to `Failed`.
    ///
    /// # Errors
    /// Returns [`CoreError::IllegalTransition`] when the job is already terminal.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.advance(JobState::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }
}

/// Server-side generation state reported by a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationState {
    /// Server has no record of work yet (also used when state is absent).
    None,
    /// Generation is in progress.
    Running,
    /// Generation finished.
    Done,
    /// Generation failed on the server.
    Error,
    /// State string this client does not know about.
    Unrecognized(String),
}

impl GenerationState {
    /// Maps the wire `state` field; absent maps to [`GenerationState::None`].
    pub fn from_wire(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::None;
        };

        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "running" => Self::Running,
            "done" => Self::Done,
            "error" => Self::Error,
            _ => Self::Unrecognized(raw.to_string()),
        }
    }
}

/// Latest status snapshot for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationStatus {
    /// Reported state.
    pub state: GenerationState,
    /// Representative artifact; only kept when `state` is `Done`.
    pub representative: Option<ArtifactReference>,
    /// Server error text; only kept when `state` is `Error`.
    pub error: Option<String>,
}

impl GenerationStatus {
    /// Builds a snapshot, dropping fields that do not belong to `state`.
    ///
    /// A representative path that is blank after sanitizing counts as absent.
    pub fn new(state: GenerationState, representative: Option<&str>, error: Option<&str>) -> Self {
        let representative = match state {
            GenerationState::Done => representative.and_then(ArtifactReference::parse),
            _ => None,
        };
        let error = match state {
            GenerationState::Error => error
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(str::to_string),
            _ => None,
        };

        Self {
            state,
            representative,
            error,
        }
    }
}

/// Sanitized server-relative artifact path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactReference(String);

impl ArtifactReference {
    /// Sanitizes `raw` and wraps it.
    ///
    /// Returns `None` when nothing is left after sanitizing, which means the
    /// artifact is not available yet.
    pub fn parse(raw: &str) -> Option<Self> {
        let clean = sanitize_artifact_path(raw);
        if clean.is_empty() {
            None
        } else {
            Some(Self(clean.to_string()))
        }
    }

    /// Returns the sanitized path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims surrounding whitespace, then leading and trailing `/`.
pub fn sanitize_artifact_path(raw: &str) -> &str {
    raw.trim().trim_matches('/')
}

/// Per-character artifact family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Characters cut from the user's own sample.
    Handwriting,
    /// Characters produced by the generator.
    Generation,
}

impl SlotKind {
    fn directory(self) -> &'static str {
        match self {
            Self::Handwriting => "handwriting",
            Self::Generation => "generation",
        }
    }
}

/// Builds the download path for one character slot of a finished job.
///
/// Layout: `result<jobId>/<handwriting|generation>/<index>.png`.
pub fn character_slot_path(job_id: &str, kind: SlotKind, index: usize) -> String {
    format!("result{}/{}/{index}.png", job_id.trim(), kind.directory())
}

/// Outcome of a sample upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Filename the server stored the sample under.
    pub filename: String,
    /// Server-assigned job id, when provided.
    pub job_id: Option<String>,
}

/// Where a resolved job id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobIdOrigin {
    /// Server returned the id.
    Server,
    /// Derived from the filename prefix before the first `_`.
    Filename,
    /// Wall-clock seconds; last resort only.
    Clock,
}

/// Job id with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedJobId {
    /// Resolved id.
    pub id: String,
    /// Provenance of `id`.
    pub origin: JobIdOrigin,
}

/// Resolves the job id for an accepted upload.
///
/// Order of preference:
/// 1. the server-assigned id,
/// 2. the first non-empty `_`-separated segment of `filename`,
/// 3. `now_unix_secs()` rendered as decimal. This is a last resort: the server
///    has no record of such an id and later calls may not match.
///
/// Blank ids are treated as absent at every step.
pub fn derive_job_id(
    filename: &str,
    server_job_id: Option<&str>,
    now_unix_secs: impl FnOnce() -> u64,
) -> DerivedJobId {
    if let Some(id) = server_job_id.map(str::trim).filter(|id| !id.is_empty()) {
        return DerivedJobId {
            id: id.to_string(),
            origin: JobIdOrigin::Server,
        };
    }

    if let Some(prefix) = filename
        .trim()
        .split('_')
        .map(str::trim)
        .find(|segment| !segment.is_empty())
    {
        return DerivedJobId {
            id: prefix.to_string(),
            origin: JobIdOrigin::Filename,
        };
    }

    DerivedJobId {
        id: now_unix_secs().to_string(),
        origin: JobIdOrigin::Clock,
    }
}

/// Fixed similarity metric vocabulary, declared in display order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MetricName {
    /// Embedding cosine similarity between handwriting styles.
    #[serde(rename = "cosine similarity")]
    CosineSimilarity,
    /// Agreement of extracted local features.
    #[serde(rename = "feature match")]
    FeatureMatch,
    /// Skeleton/structure agreement.
    #[serde(rename = "structural accuracy")]
    StructuralAccuracy,
    /// Ink density agreement.
    #[serde(rename = "stroke density")]
    StrokeDensity,
    /// Glyph outline agreement.
    #[serde(rename = "shape fidelity")]
    ShapeFidelity,
}

impl MetricName {
    /// All metrics in display order.
    pub const ALL: [MetricName; 5] = [
        Self::CosineSimilarity,
        Self::FeatureMatch,
        Self::StructuralAccuracy,
        Self::StrokeDensity,
        Self::ShapeFidelity,
    ];

    /// Canonical wire key.
    pub fn key(self) -> &'static str {
        match self {
            Self::CosineSimilarity => "cosine similarity",
            Self::FeatureMatch => "feature match",
            Self::StructuralAccuracy => "structural accuracy",
            Self::StrokeDensity => "stroke density",
            Self::ShapeFidelity => "shape fidelity",
        }
    }

    /// Localized label the analysis server also emits as a key.
    pub fn localized_label(self) -> &'static str {
        match self {
            Self::CosineSimilarity => "AI 필체 유사도",
            Self::FeatureMatch => "특징 일치도",
            Self::StructuralAccuracy => "구조적 정확도",
            Self::StrokeDensity => "획 농도",
            Self::ShapeFidelity => "글자 외형",
        }
    }

    /// Resolves a wire key or localized label.
    pub fn from_key(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL.into_iter().find(|name| {
            name.key().eq_ignore_ascii_case(trimmed) || name.localized_label() == trimmed
        })
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Similarity scores keyed by the fixed vocabulary.
///
/// Scores are clamped into `[0, 1]`. Iteration follows vocabulary order, not
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricSet {
    scores: BTreeMap<MetricName, f64>,
}

impl MetricSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from raw wire entries.
    ///
    /// Returns the set and the keys that were dropped because they are
    /// outside the vocabulary or carry a non-finite value.
    pub fn from_wire<'a, I>(entries: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut set = Self::new();
        let mut ignored = Vec::new();
        for (key, value) in entries {
            let accepted = MetricName::from_key(key)
                .map(|name| set.insert(name, value).is_ok())
                .unwrap_or(false);
            if !accepted {
                ignored.push(key.to_string());
            }
        }
        (set, ignored)
    }

    /// Inserts or replaces one score, clamped into `[0, 1]`.
    ///
    /// # Errors
    /// Returns [`CoreError::NonFiniteScore`] for NaN or infinite values.
    pub fn insert(&mut self, name: MetricName, value: f64) -> Result<(), CoreError> {
        if !value.is_finite() {
            return Err(CoreError::NonFiniteScore(name));
        }
        self.scores.insert(name, value.clamp(0.0, 1.0));
        Ok(())
    }

    /// Returns the score for `name`, if present.
    pub fn get(&self, name: MetricName) -> Option<f64> {
        self.scores.get(&name).copied()
    }

    /// Returns the score for `name`, or `0.0` when missing.
    pub fn score_or_zero(&self, name: MetricName) -> f64 {
        self.get(name).unwrap_or(0.0)
    }

    /// Number of scores present.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns `true` when no scores are present.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Iterates present scores in vocabulary order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricName, f64)> + '_ {
        self.scores.iter().map(|(name, value)| (*name, *value))
    }

    /// Scores for every vocabulary entry in display order, `0.0` for missing.
    pub fn chart_values(&self) -> [f64; 5] {
        MetricName::ALL.map(|name| self.score_or_zero(name))
    }

    /// Arithmetic mean of present scores; `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.scores.is_empty() {
            return None;
        }
        let total: f64 = self.scores.values().sum();
        Some(total / self.scores.len() as f64)
    }
}

/// Error type for core domain validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Lifecycle transition is not allowed.
    #[error("illegal job transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state.
        from: JobState,
        /// Requested state.
        to: JobState,
    },
    /// Source filename is blank.
    #[error("invalid source filename: {0:?}")]
    InvalidFilename(String),
    /// Job id is missing or blank.
    #[error("job id is missing or empty")]
    InvalidJobId,
    /// Metric value is NaN or infinite.
    #[error("non-finite score for metric {0}")]
    NonFiniteScore(MetricName),
}
