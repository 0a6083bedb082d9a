//! Shared fixtures for app integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inkly_poller::PollerConfig;
use inkly_protocol::JobClient;
use inkly_transport::{
    HttpBackend, HttpResponse, Method, PreparedRequest, Transport, TransportConfig, TransportError,
};

/// Minimal bytes recognized as PNG by signature sniffing.
#[allow(dead_code)]
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

type Reply = Result<HttpResponse, TransportError>;

/// Backend answering by `METHOD /path`.
///
/// Each route replays its queue; the last reply repeats once the queue is
/// down to one entry. Unknown routes answer 404.
#[derive(Debug, Default)]
pub struct RoutedBackend {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<PreparedRequest>>,
}

#[allow(dead_code)]
impl RoutedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, method: Method, path: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .expect("route lock should work")
            .insert(route_key(method, path), replies.into());
    }

    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().expect("request lock should work").clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<PreparedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.path() == path)
            .collect()
    }
}

impl HttpBackend for RoutedBackend {
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .expect("request lock should work")
            .push(request.clone());

        let mut routes = self.routes.lock().expect("route lock should work");
        let Some(queue) = routes.get_mut(&route_key(request.method, request.url.path())) else {
            return Err(TransportError::Http {
                status: 404,
                body: "no route".to_string(),
            });
        };
        match queue.len() {
            0 => Err(TransportError::Network("route exhausted".to_string())),
            1 => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Network("route exhausted".to_string()))),
            _ => queue
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("route exhausted".to_string()))),
        }
    }
}

fn route_key(method: Method, path: &str) -> String {
    format!("{} {path}", method.as_str())
}

/// JSON response with status 200.
#[allow(dead_code)]
pub fn json(body: &str) -> Reply {
    Ok(HttpResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: body.as_bytes().to_vec(),
    })
}

/// PNG response with status 200.
#[allow(dead_code)]
pub fn png() -> Reply {
    Ok(HttpResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "image/png".to_string())],
        body: PNG_BYTES.to_vec(),
    })
}

/// Client wired to a routed backend.
#[allow(dead_code)]
pub fn client_with(backend: Arc<RoutedBackend>) -> JobClient {
    let config = TransportConfig::new("https://inkly.example.test", "test-key")
        .expect("config should build");
    JobClient::new(Transport::new(config, backend))
}

/// Poller settings that finish within a few milliseconds.
#[allow(dead_code)]
pub fn fast_poller() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(1),
        budget: Duration::from_millis(20),
        ..PollerConfig::default()
    }
}
