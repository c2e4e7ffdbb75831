//! HTTP/REST server implementation with WebSocket and SSE streaming
//!
//! Provides HTTP endpoints for chord suggestion:
//! - POST /chords - Chords and accompaniment for an audio file
//! - POST /instructions - Songwriting steps for a theme
//! - POST /tabs - Guitar and bass tabs for a chord sequence
//! - GET /ws - Streaming session over WebSocket
//! - GET /sessions - Live streaming sessions
//! - GET /sessions/events - SSE feed of every delivered session message
//! - GET /metrics - Prometheus text exposition
//! - GET /health, GET /healthz - Health check

use crate::error::{ApiError, Error, Result};
use crate::metrics::ServiceMetrics;
use crate::ws::split_socket;
use axum::{
    extract::{rejection::JsonRejection, MatchedPath, Request, State, WebSocketUpgrade},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chordstream_core::collaborators::{Chord, TabSheet};
use chordstream_core::pipeline::ChordResult;
use chordstream_core::service::MusicService;
use chordstream_core::session::{BroadcastFanout, SessionInfo};
use chordstream_core::session_loop::SessionLoop;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::compression::predicate::{DefaultPredicate, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;

/// Header carrying the server-side handling time in seconds
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

/// Responses smaller than this are sent uncompressed
const COMPRESSION_MIN_BYTES: u16 = 1000;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Request/response operations
    pub service: MusicService,
    /// Runs WebSocket connections
    pub session_loop: SessionLoop,
    pub metrics: ServiceMetrics,
    /// Source of `/sessions/events`; `None` disables the feed
    pub fanout: Option<BroadcastFanout>,
}

impl AppState {
    pub fn new(service: MusicService, session_loop: SessionLoop, metrics: ServiceMetrics) -> Self {
        Self {
            service,
            session_loop,
            metrics,
            fanout: None,
        }
    }

    pub fn with_fanout(mut self, fanout: BroadcastFanout) -> Self {
        self.fanout = Some(fanout);
        self
    }
}

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/chords", post(chords_handler))
        .route("/instructions", post(instructions_handler))
        .route("/tabs", post(tabs_handler))
        .route("/ws", get(ws_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sessions/events", get(session_events_handler))
        .layer(middleware::from_fn_with_state(state.clone(), track_latency))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive())
                .layer(CompressionLayer::new().compress_when(
                    DefaultPredicate::new().and(SizeAbove::new(COMPRESSION_MIN_BYTES)),
                )),
        )
}

/// HTTP server serving the chord API
pub struct HttpServer {
    /// Server bind address
    bind_address: String,
    /// Shared server state
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server
    ///
    /// # Arguments
    ///
    /// * `bind_address` - Address to bind to (e.g., "127.0.0.1:8000")
    /// * `state` - Service, session loop and metrics shared by handlers
    pub fn new(bind_address: impl Into<String>, state: AppState) -> Self {
        Self {
            bind_address: bind_address.into(),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Start the HTTP server
    ///
    /// This method blocks until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server, stopping gracefully when `signal` resolves
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: std::net::SocketAddr = self
            .bind_address
            .parse()
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", self.bind_address, e)))?;

        let router = build_router(self.state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| Error::ServerError(e.to_string()))?;

        Ok(())
    }
}

/// Records latency per route and stamps the process-time header
async fn track_latency(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = start.elapsed();

    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    state
        .metrics
        .record_request(method.as_str(), &route, response.status().as_u16(), elapsed);
    tracing::info!(
        method = %method,
        route = %route,
        status = response.status().as_u16(),
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        "request handled"
    );

    response
}

// Handler implementations

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// GET /metrics - Prometheus text format
async fn metrics_handler(State(state): State<AppState>) -> std::result::Result<Response, ApiError> {
    let pipeline = state.service.pipeline();
    state.metrics.sync(pipeline.cache().stats(), pipeline.stats());
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::internal(format!("failed to encode metrics: {}", e)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Request body for POST /chords
#[derive(Debug, Serialize, Deserialize)]
pub struct ChordRequest {
    pub file_path: String,
}

/// Request body for POST /instructions
#[derive(Debug, Serialize, Deserialize)]
pub struct InstructionRequest {
    pub theme: String,
}

/// Response body for POST /instructions
#[derive(Debug, Serialize, Deserialize)]
pub struct InstructionResponse {
    pub steps: Vec<String>,
}

/// Request body for POST /tabs
#[derive(Debug, Serialize, Deserialize)]
pub struct TabRequest {
    pub chords: Vec<Chord>,
}

fn body<T>(
    payload: std::result::Result<Json<T>, JsonRejection>,
) -> std::result::Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::input(rejection.body_text()))
}

/// POST /chords - Chords and accompaniment for a file on the server
async fn chords_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChordRequest>, JsonRejection>,
) -> std::result::Result<Json<ChordResult>, ApiError> {
    let request = body(payload)?;
    if request.file_path.trim().is_empty() {
        return Err(ApiError::input("file_path must not be empty"));
    }

    let result = state.service.suggest_chords(&request.file_path).await?;
    Ok(Json(result))
}

/// POST /instructions - Songwriting steps for a theme
async fn instructions_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InstructionRequest>, JsonRejection>,
) -> std::result::Result<Json<InstructionResponse>, ApiError> {
    let request = body(payload)?;
    let steps = state.service.instructions(&request.theme).await?;
    Ok(Json(InstructionResponse { steps }))
}

/// POST /tabs - Guitar and bass tabs for a chord sequence
async fn tabs_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TabRequest>, JsonRejection>,
) -> std::result::Result<Json<TabSheet>, ApiError> {
    let request = body(payload)?;
    let sheet = state.service.tabs(request.chords).await?;
    Ok(Json(sheet))
}

/// GET /ws - Upgrade to a streaming session
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, source) = split_socket(socket);
        state.metrics.record_session_start();
        let summary = state.session_loop.run(source, Box::new(sink)).await;
        state.metrics.record_session_end();
        tracing::debug!(
            session_id = %summary.session_id,
            malformed = summary.malformed,
            rejected = summary.chunks_rejected,
            "websocket session finished"
        );
    })
}

/// GET /sessions - Live streaming sessions
async fn sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.session_loop.manager().sessions())
}

/// GET /sessions/events - SSE stream of delivered session messages
async fn session_events_handler(
    State(state): State<AppState>,
) -> std::result::Result<
    Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>,
    ApiError,
> {
    let fanout = state
        .fanout
        .as_ref()
        .ok_or_else(|| ApiError::not_found("session event feed is disabled"))?;

    let stream = BroadcastStream::new(fanout.subscribe()).filter_map(|result| match result {
        Ok(event) => {
            let json = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.message.kind()).data(json)))
        }
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!("Session event subscriber lagged by {} messages", n);
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
