//! Integration tests for the concurrent result set download.

mod common;

use common::{PNG_BYTES, RoutedBackend, client_with, png};
use inkly_app::{AppError, fetch_result_set};
use inkly_core::{ArtifactReference, CHARACTER_SLOT_COUNT, SlotKind};
use inkly_protocol::ClientError;
use inkly_transport::{HttpResponse, Method};

fn representative() -> ArtifactReference {
    ArtifactReference::parse("resultabc/rep.png").expect("path should parse")
}

fn tagged_png(tag: u8) -> Result<HttpResponse, inkly_transport::TransportError> {
    let mut body = PNG_BYTES.to_vec();
    body.push(tag);
    Ok(HttpResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "image/png".to_string())],
        body,
    })
}

#[tokio::test]
async fn result_set_fanout_tests_fills_every_slot() {
    let backend = RoutedBackend::new();
    backend.route(Method::Get, "/download/resultabc/rep.png", vec![png()]);
    for index in 0..CHARACTER_SLOT_COUNT {
        let tag = u8::try_from(index).expect("index fits");
        backend.route(
            Method::Get,
            &format!("/download/resultabc/handwriting/{index}.png"),
            vec![tagged_png(tag)],
        );
        backend.route(
            Method::Get,
            &format!("/download/resultabc/generation/{index}.png"),
            vec![tagged_png(100 + tag)],
        );
    }
    let client = client_with(backend.clone());

    let results = fetch_result_set(&client, "abc", &representative())
        .await
        .expect("result set should download");

    assert_eq!(results.available_slots(), CHARACTER_SLOT_COUNT * 2);
    assert_eq!(backend.requests().len(), CHARACTER_SLOT_COUNT * 2 + 1);
    for index in 0..CHARACTER_SLOT_COUNT {
        let tag = u8::try_from(index).expect("index fits");
        let handwriting = results
            .slot(SlotKind::Handwriting, index)
            .expect("handwriting slot should exist");
        let generation = results
            .slot(SlotKind::Generation, index)
            .expect("generation slot should exist");
        assert_eq!(handwriting.last(), Some(&tag));
        assert_eq!(generation.last(), Some(&(100 + tag)));
    }
}

#[tokio::test]
async fn result_set_fanout_tests_failed_slots_stay_empty() {
    let backend = RoutedBackend::new();
    backend.route(Method::Get, "/download/resultabc/rep.png", vec![png()]);
    backend.route(Method::Get, "/download/resultabc/handwriting/2.png", vec![png()]);
    backend.route(
        Method::Get,
        "/download/resultabc/generation/2.png",
        vec![Ok(HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            body: b"<html></html>".to_vec(),
        })],
    );
    let client = client_with(backend);

    let results = fetch_result_set(&client, "abc", &representative())
        .await
        .expect("slot failures should not fail the set");

    assert_eq!(results.available_slots(), 1);
    assert!(results.slot(SlotKind::Handwriting, 2).is_some());
    assert!(results.slot(SlotKind::Generation, 2).is_none());
    assert!(results.slot(SlotKind::Handwriting, CHARACTER_SLOT_COUNT).is_none());
    assert_eq!(results.handwriting.len(), CHARACTER_SLOT_COUNT);
    assert_eq!(results.generation.len(), CHARACTER_SLOT_COUNT);
}

#[tokio::test]
async fn result_set_fanout_tests_representative_failure_propagates() {
    let backend = RoutedBackend::new();
    let client = client_with(backend);

    let error = fetch_result_set(&client, "abc", &representative())
        .await
        .expect_err("missing representative should fail");
    assert!(matches!(
        error,
        AppError::Client(ClientError::Http { status: 404, .. })
    ));
}

#[tokio::test]
async fn result_set_fanout_tests_undecodable_representative_is_decode_error() {
    let backend = RoutedBackend::new();
    backend.route(
        Method::Get,
        "/download/resultabc/rep.png",
        vec![Ok(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"not an image".to_vec(),
        })],
    );
    let client = client_with(backend);

    let error = fetch_result_set(&client, "abc", &representative())
        .await
        .expect_err("garbage representative should fail");
    assert!(matches!(error, AppError::Client(ClientError::Decode(_))));
}
