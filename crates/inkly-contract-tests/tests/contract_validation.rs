//! Validates wire fixtures and client requests against frozen JSON schemas.

use std::sync::{Arc, Mutex};

use inkly_core::{GenerationState, MetricName};
use inkly_protocol::{
    AnalyzeEnvelope, ClientError, DEFAULT_LAMBDAS, JobClient, ReanalyzeEnvelope, StatusEnvelope,
    UploadEnvelope, parse_envelope,
};
use inkly_transport::{
    HttpBackend, HttpResponse, PreparedRequest, Transport, TransportConfig, TransportError,
};
use jsonschema::JSONSchema;
use serde_json::Value;

const CONTRACTS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts");

fn load_json(path: &str) -> Value {
    let raw = std::fs::read_to_string(path).expect("json file should be readable");
    serde_json::from_str(&raw).expect("json file should be valid")
}

fn schema(name: &str) -> JSONSchema {
    let schema = load_json(&format!("{CONTRACTS}/{name}.schema.json"));
    JSONSchema::compile(&schema).expect("schema should compile")
}

fn fixture(name: &str) -> Value {
    load_json(&format!("{CONTRACTS}/fixtures/{name}.json"))
}

fn response(body: &Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: serde_json::to_vec(body).expect("fixture should encode"),
    }
}

/// Records the request body and answers with a fixed JSON reply.
struct CapturingBackend {
    reply: Value,
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl HttpBackend for CapturingBackend {
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse, TransportError> {
        self.bodies
            .lock()
            .expect("body lock should work")
            .push(request.body.clone());
        Ok(response(&self.reply))
    }
}

fn capturing_client(reply: Value) -> (JobClient, Arc<CapturingBackend>) {
    let backend = Arc::new(CapturingBackend {
        reply,
        bodies: Mutex::new(Vec::new()),
    });
    let config = TransportConfig::new("https://inkly.example.test", "test-key")
        .expect("config should build");
    (
        JobClient::new(Transport::new(config, backend.clone())),
        backend,
    )
}

fn last_body(backend: &CapturingBackend) -> Value {
    let bodies = backend.bodies.lock().expect("body lock should work");
    let body = bodies.last().expect("a request should have been sent");
    serde_json::from_slice(body).expect("request body should be json")
}

#[test]
fn upload_fixture_matches_schema_and_parses() {
    let validator = schema("upload-response");
    let valid = fixture("upload-response.valid");
    assert!(validator.is_valid(&valid), "upload fixture should validate");
    assert!(
        !validator.is_valid(&fixture("upload-response.invalid")),
        "accepted upload without filename should not validate"
    );

    let envelope: UploadEnvelope =
        parse_envelope(&response(&valid)).expect("upload fixture should parse");
    assert_eq!(envelope.filename.as_deref(), Some("abc_1.png"));
    assert_eq!(envelope.job_id, None);
}

#[test]
fn generate_fixture_matches_schema() {
    let validator = schema("generate-response");
    assert!(validator.is_valid(&fixture("generate-response.valid")));
}

#[test]
fn generate_request_matches_schema() {
    let (client, backend) = capturing_client(fixture("generate-response.valid"));
    let ack = client
        .start_generation("abc_1.png", "abc", DEFAULT_LAMBDAS)
        .expect("generate should be accepted");
    assert_eq!(ack.state, GenerationState::Running);

    let validator = schema("generate-request");
    let body = last_body(&backend);
    assert!(validator.is_valid(&body), "generate request should validate: {body}");
}

#[test]
fn analyze_request_matches_schema_with_and_without_filename() {
    let (client, backend) = capturing_client(fixture("analyze-response.valid"));
    let validator = schema("analyze-request");

    client.analyze("abc", None).expect("analyze should parse");
    assert!(validator.is_valid(&last_body(&backend)));

    client
        .analyze("abc", Some("abc_1.png"))
        .expect("analyze should parse");
    let body = last_body(&backend);
    assert!(validator.is_valid(&body));
    assert_eq!(body["filename"], "abc_1.png");
}

#[test]
fn status_fixtures_match_schema() {
    let validator = schema("status-response");
    let done = fixture("status-response.valid");
    let rejected = fixture("status-response.rejected");
    assert!(validator.is_valid(&done));
    assert!(validator.is_valid(&rejected));

    let envelope: StatusEnvelope = parse_envelope(&response(&done)).expect("status should parse");
    assert_eq!(envelope.state.as_deref(), Some("done"));

    let error = parse_envelope::<StatusEnvelope>(&response(&rejected))
        .expect_err("ok=false should be rejected");
    assert_eq!(
        error,
        ClientError::ServerRejected {
            message: "job not found".to_string()
        }
    );
}

#[test]
fn analysis_fixtures_match_schema_and_stay_in_vocabulary() {
    let validator = schema("analyze-response");
    let analyze = fixture("analyze-response.valid");
    let reanalyze = fixture("reanalyze-response.valid");
    assert!(validator.is_valid(&analyze));
    assert!(validator.is_valid(&reanalyze));

    let (client, _backend) = capturing_client(analyze);
    let outcome = client.analyze("abc", None).expect("analyze should parse");
    assert_eq!(outcome.metrics.len(), MetricName::ALL.len());
    assert_eq!(outcome.ignored_keys, vec!["overall count".to_string()]);

    let envelope: ReanalyzeEnvelope =
        parse_envelope(&response(&reanalyze)).expect("reanalyze should parse");
    assert_eq!(envelope.practice.as_deref(), Some("practice/abc.png"));
    let envelope: AnalyzeEnvelope =
        parse_envelope(&response(&reanalyze)).expect("extra fields should be ignored");
    assert_eq!(envelope.metrics.map(|metrics| metrics.len()), Some(2));
}
