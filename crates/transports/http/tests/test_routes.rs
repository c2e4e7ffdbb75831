//! Route-level tests driven through the router without a socket

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chordstream_core::cache::{MemoryBackend, ResultCache};
use chordstream_core::collaborators::{Collaborators, TabSheet};
use chordstream_core::pipeline::{ChordResult, InferencePipeline, WorkerPool};
use chordstream_core::service::MusicService;
use chordstream_core::session::{BroadcastFanout, SessionManager};
use chordstream_core::session_loop::{SessionLoop, SessionLoopConfig};
use chordstream_http::server::InstructionResponse;
use chordstream_http::{build_router, AppState, ErrorResponse, ServiceMetrics, PROCESS_TIME_HEADER};
use http_body_util::BodyExt;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> AppState {
    let pipeline = Arc::new(InferencePipeline::new(
        Collaborators::default(),
        Arc::new(ResultCache::new(Arc::new(MemoryBackend::new()))),
        WorkerPool::new(2),
    ));
    let fanout = BroadcastFanout::default();
    let manager = SessionManager::default().with_fanout(Arc::new(fanout.clone()));
    let session_loop =
        SessionLoop::new(manager, Arc::clone(&pipeline), SessionLoopConfig::default());
    AppState::new(
        MusicService::new(pipeline),
        session_loop,
        ServiceMetrics::with_default_registry().unwrap(),
    )
    .with_fanout(fanout)
}

/// C major triad as a 16 kHz mono WAV file
fn c_major_wav() -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    let spec = WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(file.path(), spec).unwrap();
    for n in 0..16_000 {
        let t = n as f32 / 16_000.0;
        let value: f32 = [261.63f32, 329.63, 392.0]
            .iter()
            .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
            .sum::<f32>()
            / 3.0;
        writer.write_sample((value * 0.8 * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    file
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn call(router: &Router, request: Request<Body>) -> axum::response::Response {
    tokio_test::assert_ok!(router.clone().oneshot(request).await)
}

#[tokio::test]
async fn test_health() {
    let router = build_router(test_state());
    let response = call(&router, get("/health")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_healthz_alias() {
    let router = build_router(test_state());
    let response = call(&router, get("/healthz")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_chords_repeat_is_served_from_cache() {
    let state = test_state();
    let router = build_router(state.clone());
    let wav = c_major_wav();
    let body = serde_json::json!({ "file_path": wav.path().to_str().unwrap() });

    let first = call(&router, post_json("/chords", body.clone())).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first: ChordResult = json_body(first).await;
    assert!(!first.chords.is_empty());
    assert_eq!(first.chords.len(), first.accompaniment.len());

    let second: ChordResult = json_body(call(&router, post_json("/chords", body)).await).await;
    assert_eq!(first, second);

    let stats = state.service.pipeline().cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.writes, 1);
}

#[tokio::test]
async fn test_chords_missing_file_is_not_found() {
    let router = build_router(test_state());
    let response = call(
        &router,
        post_json("/chords", serde_json::json!({ "file_path": "/no/such/file.wav" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error_type, "not_found");
}

#[tokio::test]
async fn test_malformed_body_is_input_error() {
    let router = build_router(test_state());

    let response = call(&router, post_json("/chords", serde_json::json!({ "path": "x" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error_type, "input");

    let request = post_json("/chords", serde_json::json!({ "file_path": " " }));
    let response = call(&router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_instructions() {
    let router = build_router(test_state());

    let response = call(
        &router,
        post_json("/instructions", serde_json::json!({ "theme": "summer road trip" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: InstructionResponse = json_body(response).await;
    assert!(!body.steps.is_empty());

    let request = post_json("/instructions", serde_json::json!({ "theme": "" }));
    let response = call(&router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tabs() {
    let router = build_router(test_state());

    let response = call(
        &router,
        post_json("/tabs", serde_json::json!({ "chords": ["C", "Am", "F", "G"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let sheet: TabSheet = json_body(response).await;
    assert_eq!(sheet.guitar.len(), 4);
    assert_eq!(sheet.bass.len(), 4);

    let request = post_json("/tabs", serde_json::json!({ "chords": ["Q#9"] }));
    let response = call(&router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = json_body(response).await;
    assert!(error.message.contains("Q#9"));
}

#[tokio::test]
async fn test_process_time_header_and_metrics() {
    let router = build_router(test_state());

    let response = call(&router, get("/health")).await;
    let header = response.headers().get(PROCESS_TIME_HEADER).expect("process time header");
    let seconds: f64 = header.to_str().unwrap().parse().unwrap();
    assert!(seconds >= 0.0);

    let response = call(&router, get("/metrics")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("chordstream_request_latency_seconds"));
    assert!(text.contains("route=\"/health\""));
    assert!(text.contains("chordstream_cache_hits_total"));
}

#[tokio::test]
async fn test_large_responses_are_gzipped() {
    let router = build_router(test_state());
    for _ in 0..3 {
        call(&router, get("/health")).await;
    }

    let request = Request::builder()
        .uri("/metrics")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let response = call(&router, request).await;
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );

    // Small bodies stay plain
    let request = Request::builder()
        .uri("/health")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let response = call(&router, request).await;
    assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
}

#[tokio::test]
async fn test_sessions_listing_starts_empty() {
    let router = build_router(test_state());
    let response = call(&router, get("/sessions")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let sessions: Vec<serde_json::Value> = json_body(response).await;
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_session_events_requires_fanout() {
    let mut state = test_state();
    state.fanout = None;
    let router = build_router(state);

    let response = call(&router, get("/sessions/events")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let router = build_router(test_state());
    let response = call(&router, get("/ws")).await;
    assert!(response.status().is_client_error());
}
