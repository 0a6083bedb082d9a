#![warn(missing_docs)]
//! # inkly-transport
//!
//! ## Purpose
//! Builds and sends HTTP requests against the generation server.
//!
//! ## Responsibilities
//! - Resolve endpoint paths and query parameters against the base URL.
//! - Encode JSON and `multipart/form-data` request bodies.
//! - Attach the `X-API-Key` header and the per-endpoint timeout.
//! - Classify non-2xx responses and connection failures as [`TransportError`].
//!
//! ## Data flow
//! Protocol code builds an [`ApiRequest`] -> [`Transport::send`] resolves it
//! into a [`PreparedRequest`] -> an [`HttpBackend`] performs the exchange ->
//! the [`HttpResponse`] is checked for a 2xx status and handed back.
//!
//! ## Ownership and lifetimes
//! Requests and responses own their buffers so a [`Transport`] can be shared
//! behind `Arc` and called from blocking worker threads.
//!
//! ## Error model
//! Connectivity failures are [`TransportError::Network`], statuses outside
//! `[200, 300)` are [`TransportError::Http`], unparseable JSON bodies are
//! [`TransportError::Decode`]. This layer never retries.
//!
//! ## Security and privacy notes
//! The API key is redacted from every header dump written to logs, and
//! request payloads are identified by digest instead of content.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Header carrying the static API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Default timeout for compute-heavy endpoints (upload, generate, analyze).
pub const DEFAULT_COMPUTE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default timeout for read endpoints (status, download, practice).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Upper bound on a buffered response body.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BOUNDARY_PREFIX: &str = "Inkly-";
const ERROR_BODY_PREVIEW_CHARS: usize = 512;

/// HTTP method subset used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl Method {
    /// Returns the method token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Endpoint class selecting the request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Long-running server computation.
    Compute,
    /// Cheap reads.
    Read,
}

/// Static transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server base URL; endpoint paths are appended as segments.
    pub base_url: Url,
    /// Value of the `X-API-Key` header.
    pub api_key: String,
    /// Timeout for [`TimeoutClass::Compute`] requests.
    pub compute_timeout: Duration,
    /// Timeout for [`TimeoutClass::Read`] requests.
    pub read_timeout: Duration,
}

impl TransportConfig {
    /// Creates a config with default timeouts.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidBaseUrl`] when `base_url` does not
    /// parse or cannot carry path segments.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url.trim())
            .map_err(|error| TransportError::InvalidBaseUrl(format!("{base_url}: {error}")))?;
        if parsed.cannot_be_a_base() {
            return Err(TransportError::InvalidBaseUrl(format!(
                "{base_url}: url cannot be a base"
            )));
        }

        Ok(Self {
            base_url: parsed,
            api_key: api_key.into(),
            compute_timeout: DEFAULT_COMPUTE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Returns the timeout for an endpoint class.
    pub fn timeout_for(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Compute => self.compute_timeout,
            TimeoutClass::Read => self.read_timeout,
        }
    }
}

/// Request body variants.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestBody {
    /// No body.
    Empty,
    /// Pre-encoded JSON document.
    Json(Vec<u8>),
    /// `multipart/form-data` form.
    Multipart(MultipartForm),
}

/// Endpoint-relative request description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: RequestBody,
    timeout_class: TimeoutClass,
}

impl ApiRequest {
    /// Creates a `GET` request for `path` (split on `/`), read timeout.
    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path, RequestBody::Empty, TimeoutClass::Read)
    }

    /// Creates a `POST` request with a JSON body, compute timeout.
    ///
    /// # Errors
    /// Returns [`TransportError::Encode`] when `body` cannot be serialized.
    pub fn post_json<T: Serialize>(path: &str, body: &T) -> Result<Self, TransportError> {
        let encoded =
            serde_json::to_vec(body).map_err(|error| TransportError::Encode(error.to_string()))?;
        Ok(Self::new(
            Method::Post,
            path,
            RequestBody::Json(encoded),
            TimeoutClass::Compute,
        ))
    }

    /// Creates a `POST` request with a multipart body, compute timeout.
    pub fn post_multipart(path: &str, form: MultipartForm) -> Self {
        Self::new(
            Method::Post,
            path,
            RequestBody::Multipart(form),
            TimeoutClass::Compute,
        )
    }

    fn new(method: Method, path: &str, body: RequestBody, timeout_class: TimeoutClass) -> Self {
        Self {
            method,
            segments: path_segments(path),
            query: Vec::new(),
            body,
            timeout_class,
        }
    }

    /// Appends a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

}

fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fully resolved request executed by an [`HttpBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL including query.
    pub url: Url,
    /// Header name/value pairs, API key included.
    pub headers: Vec<(String, String)>,
    /// Encoded body bytes (empty for `GET`).
    pub body: Vec<u8>,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl PreparedRequest {
    /// Returns the first header value matching `name` case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns headers with the API key value replaced, for logging.
    pub fn redacted_headers(&self) -> Vec<(String, String)> {
        redact_api_key(&self.headers)
    }
}

/// Raw response returned by an [`HttpBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns `true` for statuses in `[200, 300)`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the first header value matching `name` case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the `Content-Type` header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Returns a lossy UTF-8 rendering of the body, truncated for messages.
    pub fn body_preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        if text.chars().count() <= ERROR_BODY_PREVIEW_CHARS {
            return text.into_owned();
        }
        let truncated: String = text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
        format!("{truncated}…")
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Abstract HTTP exchange.
///
/// Implementations return every response they receive, whatever the status;
/// only connection-level failures are errors.
pub trait HttpBackend: Send + Sync {
    /// Performs one request.
    ///
    /// # Errors
    /// Returns [`TransportError::Network`] when no response was received.
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking `ureq` backend.
#[derive(Debug, Clone)]
pub struct UreqBackend {
    agent: ureq::Agent,
}

impl UreqBackend {
    /// Creates a backend with a shared connection pool.
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(CONNECT_TIMEOUT)
                .build(),
        }
    }
}

impl Default for UreqBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpBackend for UreqBackend {
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse, TransportError> {
        let mut call = self
            .agent
            .request(request.method.as_str(), request.url.as_str())
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let result = if request.body.is_empty() && request.method == Method::Get {
            call.call()
        } else {
            call.send_bytes(&request.body)
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(error)) => {
                return Err(TransportError::Network(error.to_string()));
            }
        };

        let status = response.status();
        let headers = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = response.header(&name)?.to_string();
                Some((name, value))
            })
            .collect();
        let body = read_response_bytes(response, MAX_RESPONSE_BYTES)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn read_response_bytes(
    response: ureq::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut limited = response.into_reader().take(max_bytes as u64 + 1);
    let mut bytes = Vec::new();
    limited
        .read_to_end(&mut bytes)
        .map_err(|error| TransportError::Network(format!("response read failed: {error}")))?;
    if bytes.len() > max_bytes {
        return Err(TransportError::Decode(format!(
            "response exceeded {max_bytes} bytes"
        )));
    }
    Ok(bytes)
}

/// Shared request sender bound to one server.
#[derive(Clone)]
pub struct Transport {
    config: TransportConfig,
    backend: Arc<dyn HttpBackend>,
}

impl Transport {
    /// Creates a transport over an arbitrary backend.
    pub fn new(config: TransportConfig, backend: Arc<dyn HttpBackend>) -> Self {
        Self { config, backend }
    }

    /// Creates a transport over [`UreqBackend`].
    pub fn with_ureq(config: TransportConfig) -> Self {
        Self::new(config, Arc::new(UreqBackend::new()))
    }

    /// Resolves an [`ApiRequest`] against the base URL and attaches headers.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidBaseUrl`] when the base URL cannot
    /// take path segments and [`TransportError::Encode`] for `.` or `..`
    /// segments, which URL resolution would otherwise collapse.
    pub fn prepare(&self, request: &ApiRequest) -> Result<PreparedRequest, TransportError> {
        if let Some(segment) = request
            .segments
            .iter()
            .find(|segment| matches!(segment.as_str(), "." | ".."))
        {
            return Err(TransportError::Encode(format!(
                "relative path segment {segment:?} is not allowed"
            )));
        }

        let mut url = self.config.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TransportError::InvalidBaseUrl(self.config.base_url.to_string())
            })?;
            segments.pop_if_empty();
            segments.extend(request.segments.iter());
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                request
                    .query
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            );
        }

        let mut headers = vec![(API_KEY_HEADER.to_string(), self.config.api_key.clone())];
        let body = match &request.body {
            RequestBody::Empty => Vec::new(),
            RequestBody::Json(bytes) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                bytes.clone()
            }
            RequestBody::Multipart(form) => {
                headers.push(("Content-Type".to_string(), form.content_type()));
                form.encode()
            }
        };

        Ok(PreparedRequest {
            method: request.method,
            url,
            headers,
            body,
            timeout: self.config.timeout_for(request.timeout_class),
        })
    }

    /// Sends a request and requires a 2xx status.
    ///
    /// # Errors
    /// Returns [`TransportError::Network`] on connectivity failure and
    /// [`TransportError::Http`] for statuses outside `[200, 300)`.
    pub fn send(&self, request: &ApiRequest) -> Result<HttpResponse, TransportError> {
        let prepared = self.prepare(request)?;
        tracing::debug!(
            method = prepared.method.as_str(),
            url = %prepared.url,
            headers = ?prepared.redacted_headers(),
            body_bytes = prepared.body.len(),
            body_digest = %payload_digest(&prepared.body),
            "sending request"
        );

        let response = self.backend.execute(&prepared).inspect_err(|error| {
            tracing::debug!(url = %prepared.url, %error, "request failed before response");
        })?;
        tracing::debug!(
            url = %prepared.url,
            status = response.status,
            body_bytes = response.body.len(),
            "received response"
        );

        if !response.is_success() {
            return Err(TransportError::Http {
                status: response.status,
                body: response.body_preview(),
            });
        }
        Ok(response)
    }
}

/// Decodes a JSON response body.
///
/// # Errors
/// Returns [`TransportError::Decode`] when the body is not valid JSON for `T`.
pub fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, TransportError> {
    serde_json::from_slice(&response.body).map_err(|error| {
        TransportError::Decode(format!("{error}; body: {}", response.body_preview()))
    })
}

/// One `multipart/form-data` part.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FormPart {
    /// Plain text field.
    Text {
        /// Field name.
        name: String,
        /// Field value.
        value: String,
    },
    /// File field.
    File {
        /// Field name.
        name: String,
        /// Filename reported to the server.
        filename: String,
        /// Part content type.
        content_type: String,
        /// File bytes.
        bytes: Vec<u8>,
    },
}

/// `multipart/form-data` body with a unique boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<FormPart>,
}

impl MultipartForm {
    /// Creates an empty form with a freshly generated boundary.
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    /// Creates an empty form with a caller-provided boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Appends a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Appends a file field.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        });
        self
    }

    /// Returns the `Content-Type` header value for this form.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encodes the form body.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for part in &self.parts {
            body.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match part {
                FormPart::Text { name, value } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_disposition_value(name)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                FormPart::File {
                    name,
                    filename,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape_disposition_value(name),
                            escape_disposition_value(filename)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(
                        format!("Content-Type: {content_type}\r\n\r\n").as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

/// Percent-encodes the characters that would end a quoted
/// `Content-Disposition` parameter or the header line.
fn escape_disposition_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' => escaped.push_str("%22"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn generate_boundary() -> String {
    let mut rng = StdRng::from_os_rng();
    let token: [u8; 16] = rng.random();
    format!("{BOUNDARY_PREFIX}{}", hex::encode(token))
}

/// Failure category used for log decoration and caller policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// May succeed if attempted again later.
    Transient,
    /// Will fail again without a change in input or server state.
    Permanent,
}

/// Classifies a transport error.
pub fn classify_transport_error(error: &TransportError) -> FailureClass {
    match error {
        TransportError::Network(_) => FailureClass::Transient,
        TransportError::Http { status, .. } if *status == 408 || *status == 429 => {
            FailureClass::Transient
        }
        TransportError::Http { status, .. } if (500..600).contains(status) => {
            FailureClass::Transient
        }
        TransportError::Http { .. }
        | TransportError::Decode(_)
        | TransportError::Encode(_)
        | TransportError::InvalidBaseUrl(_) => FailureClass::Permanent,
    }
}

/// Short SHA-256 digest identifying a payload in logs.
pub fn payload_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}

/// Replaces the API key header value with `<redacted>`.
pub fn redact_api_key(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if name.eq_ignore_ascii_case(API_KEY_HEADER) {
                (name.clone(), "<redacted>".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Transport layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Base URL is malformed.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
    /// Connection, TLS, or timeout failure; no response was received.
    #[error("network failure: {0}")]
    Network(String),
    /// Server answered with a status outside `[200, 300)`.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Body preview.
        body: String,
    },
    /// Response payload could not be parsed.
    #[error("response decode failure: {0}")]
    Decode(String),
    /// Request payload could not be encoded.
    #[error("request encode failure: {0}")]
    Encode(String),
}
