#![warn(missing_docs)]
//! # inkly-protocol
//!
//! ## Purpose
//! Typed client for the generation server's HTTP protocol.
//!
//! ## Responsibilities
//! - Define one response envelope per endpoint and decode it in a single step.
//! - Treat `ok == false` as a server rejection whatever the HTTP status.
//! - Validate client-side preconditions before any network call.
//! - Enforce the image contract of download endpoints.
//!
//! ## Data flow
//! Caller -> [`JobClient`] operation -> [`inkly_transport::Transport`] ->
//! raw body -> [`parse_envelope`] -> domain value from `inkly-core`.
//!
//! ## Ownership and lifetimes
//! [`JobClient`] is cheap to clone (the transport backend is shared behind
//! `Arc`), so async callers can move a clone into blocking worker threads.
//!
//! ## Error model
//! Every operation returns [`ClientError`]. Precondition failures are
//! [`ClientError::InvalidInput`] and never touch the network.
//!
//! ## Security and privacy notes
//! Image payloads are logged by size and digest only.

use std::collections::BTreeMap;

use inkly_core::{
    ArtifactReference, CHARACTER_SLOT_COUNT, GenerationState, GenerationStatus, MetricSet,
    SlotKind, UploadResult, character_slot_path, sanitize_artifact_path,
};
use inkly_transport::{
    ApiRequest, FailureClass, HttpResponse, MultipartForm, Transport, TransportError,
    classify_transport_error, decode_json, payload_digest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default style-interpolation weights sent with a generation request.
pub const DEFAULT_LAMBDAS: [f64; 5] = [0.2, 0.4, 0.6, 0.8, 1.0];

/// Filename reported for practice attempts.
pub const PRACTICE_UPLOAD_FILENAME: &str = "practice.png";

const PNG_EXTENSION: &str = ".png";
const PNG_CONTENT_TYPE: &str = "image/png";

/// Common shape of every JSON response envelope.
pub trait Envelope: DeserializeOwned {
    /// Operation name used in default rejection messages.
    const OPERATION: &'static str;

    /// Authoritative success flag.
    fn ok(&self) -> bool;

    /// Server-provided failure message.
    fn error(&self) -> Option<&str>;
}

/// `POST /upload` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEnvelope {
    /// Success flag.
    pub ok: bool,
    /// Stored filename.
    #[serde(default)]
    pub filename: Option<String>,
    /// Server-assigned job id.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /generate` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEnvelope {
    /// Success flag.
    pub ok: bool,
    /// Accepted job id.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Initial state, usually `running`.
    #[serde(default)]
    pub state: Option<String>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

/// `GET /status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEnvelope {
    /// Success flag.
    pub ok: bool,
    /// `none`, `running`, `done` or `error`.
    #[serde(default)]
    pub state: Option<String>,
    /// Representative artifact path once done.
    #[serde(default)]
    pub representative: Option<String>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /analyze` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeEnvelope {
    /// Success flag.
    pub ok: bool,
    /// Raw metric map.
    #[serde(default)]
    pub metrics: Option<BTreeMap<String, f64>>,
    /// Analyzer variant label.
    #[serde(default)]
    pub analyze_type: Option<String>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /reanalyze` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReanalyzeEnvelope {
    /// Success flag.
    pub ok: bool,
    /// Raw metric map.
    #[serde(default)]
    pub metrics: Option<BTreeMap<String, f64>>,
    /// Analyzer variant label.
    #[serde(default)]
    pub analyze_type: Option<String>,
    /// Server path of the stored practice attempt.
    #[serde(default)]
    pub practice: Option<String>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

macro_rules! impl_envelope {
    ($ty:ty, $operation:literal) => {
        impl Envelope for $ty {
            const OPERATION: &'static str = $operation;

            fn ok(&self) -> bool {
                self.ok
            }

            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
        }
    };
}

impl_envelope!(UploadEnvelope, "upload");
impl_envelope!(GenerateEnvelope, "generate");
impl_envelope!(StatusEnvelope, "status");
impl_envelope!(AnalyzeEnvelope, "analyze");
impl_envelope!(ReanalyzeEnvelope, "reanalyze");

/// Decodes an envelope and enforces its `ok` flag.
///
/// # Errors
/// Returns [`ClientError::Decode`] for malformed JSON and
/// [`ClientError::ServerRejected`] when `ok` is `false`.
pub fn parse_envelope<E: Envelope>(response: &HttpResponse) -> Result<E, ClientError> {
    let envelope: E = decode_json(response)?;
    if !envelope.ok() {
        let message = envelope
            .error()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} failed", E::OPERATION));
        return Err(ClientError::ServerRejected { message });
    }
    Ok(envelope)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    filename: &'a str,
    lambdas: &'a [f64],
    job_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    job_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
}

/// Acknowledgement that a generation job entered the server pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAck {
    /// Job id echoed by the server.
    pub job_id: String,
    /// Initial reported state.
    pub state: GenerationState,
}

/// Parsed analysis or re-analysis result.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    /// Scores restricted to the fixed vocabulary.
    pub metrics: MetricSet,
    /// Analyzer variant label, when reported.
    pub analyze_type: Option<String>,
    /// Stored practice attempt path (re-analysis only).
    pub practice: Option<ArtifactReference>,
    /// Wire keys that were dropped on ingest.
    pub ignored_keys: Vec<String>,
}

impl AnalysisOutcome {
    fn from_wire(
        metrics: Option<BTreeMap<String, f64>>,
        analyze_type: Option<String>,
        practice: Option<String>,
    ) -> Self {
        let metrics = metrics.unwrap_or_default();
        let (metrics, ignored_keys) =
            MetricSet::from_wire(metrics.iter().map(|(key, value)| (key.as_str(), *value)));
        if !ignored_keys.is_empty() {
            tracing::debug!(?ignored_keys, "dropped metrics outside the vocabulary");
        }

        Self {
            metrics,
            analyze_type,
            practice: practice.as_deref().and_then(ArtifactReference::parse),
            ignored_keys,
        }
    }
}

/// Typed operations over the generation server protocol.
#[derive(Clone)]
pub struct JobClient {
    transport: Transport,
}

impl JobClient {
    /// Creates a client over a configured transport.
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Uploads a handwriting sample as `multipart/form-data`.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidInput`] without a network call when
    /// `filename` fails [`validate_upload_filename`] or `png` is empty.
    /// Returns [`ClientError::Decode`] when an accepted upload omits the
    /// stored filename.
    pub fn upload(&self, png: &[u8], filename: &str) -> Result<UploadResult, ClientError> {
        let filename = validate_upload_filename(filename)?;
        if png.is_empty() {
            return Err(ClientError::InvalidInput(
                "upload payload is empty".to_string(),
            ));
        }

        tracing::info!(
            filename,
            bytes = png.len(),
            digest = %payload_digest(png),
            "uploading handwriting sample"
        );
        let form = MultipartForm::new().file("file", filename, PNG_CONTENT_TYPE, png.to_vec());
        let response = self
            .transport
            .send(&ApiRequest::post_multipart("upload", form))?;
        let envelope: UploadEnvelope = parse_envelope(&response)?;

        let stored = envelope
            .filename
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                ClientError::Decode("upload response is missing filename".to_string())
            })?;
        let job_id = envelope
            .job_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(UploadResult {
            filename: stored,
            job_id,
        })
    }

    /// Asks the server to start asynchronous generation for an uploaded sample.
    ///
    /// The acknowledgement never carries an artifact; completion is observed
    /// through [`JobClient::poll_status`].
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidInput`] for blank identifiers or
    /// non-finite lambdas, and [`ClientError::Decode`] when the acknowledgement
    /// omits the job id.
    pub fn start_generation(
        &self,
        filename: &str,
        job_id: &str,
        lambdas: [f64; 5],
    ) -> Result<GenerationAck, ClientError> {
        require_non_blank("filename", filename)?;
        require_non_blank("job id", job_id)?;
        if lambdas.iter().any(|lambda| !lambda.is_finite()) {
            return Err(ClientError::InvalidInput(
                "lambdas must be finite numbers".to_string(),
            ));
        }

        let request = ApiRequest::post_json(
            "generate",
            &GenerateRequest {
                filename,
                lambdas: &lambdas,
                job_id,
            },
        )?;
        let response = self.transport.send(&request)?;
        let envelope: GenerateEnvelope = parse_envelope(&response)?;

        let acknowledged = envelope
            .job_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ClientError::Decode("generate acknowledgement is missing jobId".to_string())
            })?;
        if acknowledged != job_id {
            tracing::warn!(
                requested = job_id,
                acknowledged = %acknowledged,
                "server acknowledged a different job id"
            );
        }

        Ok(GenerationAck {
            job_id: acknowledged,
            state: GenerationState::from_wire(envelope.state.as_deref()),
        })
    }

    /// Fetches the latest generation status snapshot.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidInput`] for a blank job id; transport,
    /// decode and rejection errors otherwise.
    pub fn poll_status(&self, job_id: &str) -> Result<GenerationStatus, ClientError> {
        require_non_blank("job id", job_id)?;
        let response = self
            .transport
            .send(&ApiRequest::get("status").query("jobId", job_id))?;
        let envelope: StatusEnvelope = parse_envelope(&response)?;

        Ok(GenerationStatus::new(
            GenerationState::from_wire(envelope.state.as_deref()),
            envelope.representative.as_deref(),
            envelope.error.as_deref(),
        ))
    }

    /// Downloads an artifact by server-relative path.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidInput`] without a network call when the
    /// sanitized path is empty or has `.`/`..` segments,
    /// [`ClientError::UnexpectedContentType`] when a
    /// `Content-Type` header is present and not `image/*`,
    /// [`ClientError::EmptyPayload`] for a zero-length body and
    /// [`ClientError::Decode`] when the bytes are not a known image format.
    pub fn download_artifact(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let clean = sanitize_artifact_path(path);
        if clean.is_empty() {
            return Err(ClientError::InvalidInput(format!(
                "artifact path is empty after sanitizing: {path:?}"
            )));
        }

        let response = self
            .transport
            .send(&ApiRequest::get(&format!("download/{clean}")))?;
        expect_image(response)
    }

    /// Scores the generated artifact against the original sample.
    ///
    /// `filename` optionally selects which artifact to score against.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidInput`] for a blank job id; transport,
    /// decode and rejection errors otherwise.
    pub fn analyze(
        &self,
        job_id: &str,
        filename: Option<&str>,
    ) -> Result<AnalysisOutcome, ClientError> {
        require_non_blank("job id", job_id)?;
        let filename = filename.map(str::trim).filter(|name| !name.is_empty());
        let request = ApiRequest::post_json("analyze", &AnalyzeRequest { job_id, filename })?;
        let response = self.transport.send(&request)?;
        let envelope: AnalyzeEnvelope = parse_envelope(&response)?;

        Ok(AnalysisOutcome::from_wire(
            envelope.metrics,
            envelope.analyze_type,
            None,
        ))
    }

    /// Fetches the practice canvas underlay image.
    ///
    /// # Errors
    /// Same image contract as [`JobClient::download_artifact`].
    pub fn fetch_practice_background(&self, job_id: Option<&str>) -> Result<Vec<u8>, ClientError> {
        let mut request = ApiRequest::get("practice");
        if let Some(job_id) = job_id.map(str::trim).filter(|id| !id.is_empty()) {
            request = request.query("jobId", job_id);
        }
        let response = self.transport.send(&request)?;
        expect_image(response)
    }

    /// Re-scores a practice attempt against the job's original baseline.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidInput`] for an empty image or blank job
    /// id; transport, decode and rejection errors otherwise.
    pub fn reanalyze(
        &self,
        practice_png: &[u8],
        job_id: &str,
    ) -> Result<AnalysisOutcome, ClientError> {
        require_non_blank("job id", job_id)?;
        if practice_png.is_empty() {
            return Err(ClientError::InvalidInput(
                "practice image is empty".to_string(),
            ));
        }

        tracing::info!(
            job_id,
            bytes = practice_png.len(),
            digest = %payload_digest(practice_png),
            "submitting practice attempt"
        );
        let form = MultipartForm::new().text("jobId", job_id).file(
            "file",
            PRACTICE_UPLOAD_FILENAME,
            PNG_CONTENT_TYPE,
            practice_png.to_vec(),
        );
        let response = self
            .transport
            .send(&ApiRequest::post_multipart("reanalyze", form))?;
        let envelope: ReanalyzeEnvelope = parse_envelope(&response)?;

        Ok(AnalysisOutcome::from_wire(
            envelope.metrics,
            envelope.analyze_type,
            envelope.practice,
        ))
    }
}

/// Download location of one character slot image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSlot {
    /// Slot family.
    pub kind: SlotKind,
    /// Slot index in `0..CHARACTER_SLOT_COUNT`.
    pub index: usize,
    /// Server-relative path for [`JobClient::download_artifact`].
    pub path: String,
}

/// Lists every character slot download of `job_id`, handwriting slots first.
pub fn character_slot_paths(job_id: &str) -> Vec<CharacterSlot> {
    [SlotKind::Handwriting, SlotKind::Generation]
        .into_iter()
        .flat_map(|kind| {
            (0..CHARACTER_SLOT_COUNT).map(move |index| CharacterSlot {
                kind,
                index,
                path: character_slot_path(job_id, kind, index),
            })
        })
        .collect()
}

/// Checks an upload filename and returns it trimmed.
///
/// The name must end in `.png` (case-insensitive) and must not contain
/// quotes or control characters, since it travels in a
/// `Content-Disposition` header.
///
/// # Errors
/// Returns [`ClientError::InvalidInput`] describing the first violation.
pub fn validate_upload_filename(filename: &str) -> Result<&str, ClientError> {
    let filename = filename.trim();
    if !has_png_extension(filename) {
        return Err(ClientError::InvalidInput(format!(
            "upload filename must end in {PNG_EXTENSION}: {filename:?}"
        )));
    }
    if filename.chars().any(|ch| ch == '"' || ch.is_control()) {
        return Err(ClientError::InvalidInput(format!(
            "upload filename contains quotes or control characters: {filename:?}"
        )));
    }
    Ok(filename)
}

fn has_png_extension(filename: &str) -> bool {
    filename.len() > PNG_EXTENSION.len()
        && filename.to_ascii_lowercase().ends_with(PNG_EXTENSION)
}

fn require_non_blank(what: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}

fn expect_image(response: HttpResponse) -> Result<Vec<u8>, ClientError> {
    if let Some(content_type) = response.content_type()
        && !content_type.trim().to_ascii_lowercase().starts_with("image/")
    {
        return Err(ClientError::UnexpectedContentType(content_type.to_string()));
    }
    if response.body.is_empty() {
        return Err(ClientError::EmptyPayload);
    }
    image::guess_format(&response.body).map_err(|error| {
        ClientError::Decode(format!(
            "payload of {} bytes is not a recognized image: {error}",
            response.body.len()
        ))
    })?;
    Ok(response.body)
}

/// Protocol client errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Client-side precondition failed; no request was sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Connectivity failure.
    #[error("network error: {0}")]
    Network(String),
    /// Non-2xx response.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Body preview.
        body: String,
    },
    /// Envelope reported `ok == false`.
    #[error("{message}")]
    ServerRejected {
        /// Server message or a per-operation default.
        message: String,
    },
    /// Malformed payload.
    #[error("decode error: {0}")]
    Decode(String),
    /// Download endpoint answered with a non-image content type.
    #[error("expected an image response, got Content-Type {0}")]
    UnexpectedContentType(String),
    /// Download endpoint answered with zero bytes.
    #[error("received an empty payload")]
    EmptyPayload,
}

impl ClientError {
    /// Returns the failure category for caller policy and logs.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Network(message) => {
                classify_transport_error(&TransportError::Network(message.clone()))
            }
            Self::Http { status, body } => classify_transport_error(&TransportError::Http {
                status: *status,
                body: body.clone(),
            }),
            Self::InvalidInput(_)
            | Self::ServerRejected { .. }
            | Self::Decode(_)
            | Self::UnexpectedContentType(_)
            | Self::EmptyPayload => FailureClass::Permanent,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::InvalidBaseUrl(message) | TransportError::Encode(message) => {
                Self::InvalidInput(message)
            }
            TransportError::Network(message) => Self::Network(message),
            TransportError::Http { status, body } => Self::Http { status, body },
            TransportError::Decode(message) => Self::Decode(message),
        }
    }
}
