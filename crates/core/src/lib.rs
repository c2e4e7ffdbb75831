//! Chordstream Core - Transport-agnostic streaming session engine
//!
//! This crate turns streamed audio into chord suggestions and accompaniment.
//! It owns everything with real concurrency and lifecycle concerns:
//!
//! - [`buffer::AdaptiveBuffer`] - paces irregular byte chunks into feature windows
//! - [`cache::ResultCache`] - cache-aside store keyed by feature fingerprints
//! - [`session::SessionManager`] - registry of live sessions and outbound delivery
//! - [`pipeline::InferencePipeline`] - decode → features → denoise → cache → suggest → accompany
//! - [`session_loop::SessionLoop`] - heartbeat, processing and receive tasks per connection
//!
//! Transport crates (HTTP/WebSocket) implement [`session::MessageSink`] and
//! [`session::MessageSource`] and hand connections to a `SessionLoop`.
//!
//! # Example
//!
//! ```ignore
//! use chordstream_core::cache::{MemoryBackend, ResultCache};
//! use chordstream_core::collaborators::Collaborators;
//! use chordstream_core::pipeline::{InferencePipeline, WorkerPool};
//! use std::sync::Arc;
//!
//! let cache = Arc::new(ResultCache::new(Arc::new(MemoryBackend::new())));
//! let pipeline = InferencePipeline::new(Collaborators::default(), cache, WorkerPool::default());
//! let result = pipeline.process_path("song.wav").await?;
//! println!("{:?}", result.chords);
//! ```

#![warn(clippy::all)]

pub mod buffer;
pub mod cache;
pub mod collaborators;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod service;
pub mod session;
pub mod session_loop;

pub use error::{
    BufferError, CacheError, CollaboratorError, Error, PipelineError, Result, SessionError, Stage,
    TransportError,
};
