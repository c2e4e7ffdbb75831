//! Error types for Chordstream Core
//!
//! Failures are scoped by blast radius:
//!
//! - [`BufferError`] - backpressure on a single session's buffer
//! - [`SessionError`] - per-message rejection or transport teardown
//! - [`PipelineError`] - one unit of inference work aborted
//! - [`CacheError`] - backend trouble; never escapes [`crate::cache::ResultCache`]

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for Chordstream Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Umbrella error for callers that mix components
#[derive(Debug, Error)]
pub enum Error {
    /// Adaptive buffer rejected input
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Session-level failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Inference pipeline failure
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Cache backend failure (only surfaced by backend constructors)
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Errors raised by [`crate::buffer::AdaptiveBuffer::add`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Unconsumed backlog would exceed the configured ceiling
    #[error("buffer capacity exceeded: backlog {backlog} + chunk {requested} > capacity {capacity} bytes")]
    CapacityExceeded {
        /// Bytes currently waiting to be windowed
        backlog: usize,
        /// Size of the rejected chunk
        requested: usize,
        /// Configured ceiling
        capacity: usize,
    },

    /// Buffer was closed during session teardown
    #[error("buffer is closed")]
    Closed,
}

/// Session and transport errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Inbound message failed validation; the session survives
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Outbound delivery failed; the session has been torn down
    #[error("transport failure for session {session_id}: {reason}")]
    TransportFailure {
        /// Session that was disconnected
        session_id: Uuid,
        /// What went wrong
        reason: String,
    },

    /// Operation on a session that is already closed
    #[error("session {0} is closed")]
    SessionClosed(Uuid),
}

/// Transport-level I/O errors raised by sinks and sources
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer went away
    #[error("connection closed")]
    Closed,

    /// Message could not be encoded for the wire
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors returned by external collaborators (decoder, extractor, suggester...)
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Referenced input does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Input could not be interpreted
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error while reading input
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other collaborator failure
    #[error("{0}")]
    Failed(String),
}

/// Pipeline stage a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Decode,
    ExtractFeatures,
    Denoise,
    SuggestChords,
    GenerateAccompaniment,
    GenerateInstructions,
    GenerateTabs,
}

impl Stage {
    /// Stable name used in logs and error payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::ExtractFeatures => "extract_features",
            Stage::Denoise => "denoise",
            Stage::SuggestChords => "suggest_chords",
            Stage::GenerateAccompaniment => "generate_accompaniment",
            Stage::GenerateInstructions => "generate_instructions",
            Stage::GenerateTabs => "generate_tabs",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single unit of inference work
///
/// Never corrupts shared state: cache entries are written only after a
/// successful suggestion, and the owning session keeps running.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A collaborator returned an error
    #[error("{stage} failed: {source}")]
    CollaboratorFailure {
        /// Stage that failed
        stage: Stage,
        /// Collaborator error
        #[source]
        source: CollaboratorError,
    },

    /// The worker running a collaborator panicked or was shut down
    #[error("{stage} worker aborted: {message}")]
    WorkerAborted {
        /// Stage that was running
        stage: Stage,
        /// Panic or shutdown description
        message: String,
    },
}

impl PipelineError {
    /// Stage the failure belongs to
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::CollaboratorFailure { stage, .. }
            | PipelineError::WorkerAborted { stage, .. } => *stage,
        }
    }
}

/// Cache backend errors
///
/// [`crate::cache::ResultCache`] logs and swallows these; they only reach
/// callers from backend constructors such as `SqliteBackend::open`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend is unreachable or failed
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored payload could not be encoded or decoded
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_reports_stage() {
        let err = PipelineError::CollaboratorFailure {
            stage: Stage::SuggestChords,
            source: CollaboratorError::Failed("model exploded".to_string()),
        };
        assert_eq!(err.stage(), Stage::SuggestChords);
        assert_eq!(err.to_string(), "suggest_chords failed: model exploded");
    }

    #[test]
    fn test_capacity_error_message() {
        let err = BufferError::CapacityExceeded {
            backlog: 10,
            requested: 5,
            capacity: 12,
        };
        assert!(err.to_string().contains("capacity 12"));
    }
}
