//! Chordstream HTTP Transport
//!
//! REST and WebSocket front end for [`chordstream_core`]. The REST routes
//! call [`chordstream_core::service::MusicService`]; `/ws` hands each
//! upgraded socket to a [`chordstream_core::session_loop::SessionLoop`].
//!
//! # Example
//!
//! ```ignore
//! use chordstream_http::{AppState, HttpServer, ServiceMetrics};
//!
//! let state = AppState::new(service, session_loop, ServiceMetrics::with_default_registry()?);
//! HttpServer::new("0.0.0.0:8000", state).serve().await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod metrics;
pub mod server;
pub mod ws;

pub use error::{ApiError, Error, ErrorResponse, Result};
pub use metrics::ServiceMetrics;
pub use server::{build_router, AppState, HttpServer, PROCESS_TIME_HEADER};
