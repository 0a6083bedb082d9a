//! Shared fixtures for protocol integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use inkly_protocol::JobClient;
use inkly_transport::{
    HttpBackend, HttpResponse, PreparedRequest, Transport, TransportConfig, TransportError,
};

/// Minimal bytes recognized as PNG by signature sniffing.
#[allow(dead_code)]
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// Backend that replays queued responses and records every request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<PreparedRequest>>,
}

#[allow(dead_code)]
impl ScriptedBackend {
    pub fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().expect("request lock should work").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("request lock should work").len()
    }
}

impl HttpBackend for ScriptedBackend {
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .expect("request lock should work")
            .push(request.clone());
        self.responses
            .lock()
            .expect("response lock should work")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("script exhausted".to_string())))
    }
}

/// JSON response with status 200.
#[allow(dead_code)]
pub fn json(body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: body.as_bytes().to_vec(),
    })
}

/// Binary response with an optional content type.
#[allow(dead_code)]
pub fn bytes(content_type: Option<&str>, body: &[u8]) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status: 200,
        headers: content_type
            .map(|value| vec![("Content-Type".to_string(), value.to_string())])
            .unwrap_or_default(),
        body: body.to_vec(),
    })
}

/// Client wired to a scripted backend.
pub fn client_with(backend: Arc<ScriptedBackend>) -> JobClient {
    let config = TransportConfig::new("https://inkly.example.test/", "test-key")
        .expect("config should build");
    JobClient::new(Transport::new(config, backend))
}
