//! Streaming wire protocol
//!
//! Server → client messages are flat JSON objects:
//!
//! | Message | JSON |
//! |---|---|
//! | ready | `{"ready": true}` |
//! | ack | `{"ack": true}` |
//! | heartbeat | `{"type": "ping"}` |
//! | result | `{"chords": [...], "accompaniment": [...]}` |
//! | error | `{"error": "..."}` |
//!
//! Client → server text frames carry `{"data": "<string>"}`; binary frames
//! are raw audio bytes.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::collaborators::Chord;
use crate::error::SessionError;
use crate::pipeline::ChordResult;
use crate::session::InboundFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingType {
    Ping,
}

/// Message sent from the server to a streaming client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Ready {
        ready: bool,
    },
    Ack {
        ack: bool,
    },
    Ping {
        #[serde(rename = "type")]
        kind: PingType,
    },
    Chords {
        chords: Vec<Chord>,
        accompaniment: Vec<Chord>,
    },
    Error {
        error: String,
    },
}

impl OutboundMessage {
    pub fn ready() -> Self {
        Self::Ready { ready: true }
    }

    pub fn ack() -> Self {
        Self::Ack { ack: true }
    }

    pub fn ping() -> Self {
        Self::Ping {
            kind: PingType::Ping,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Ack { .. } => "ack",
            Self::Ping { .. } => "ping",
            Self::Chords { .. } => "chords",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ChordResult> for OutboundMessage {
    fn from(result: ChordResult) -> Self {
        Self::Chords {
            chords: result.chords,
            accompaniment: result.accompaniment,
        }
    }
}

/// Text frame envelope sent by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub data: String,
}

/// How the `data` string of a text frame maps to audio bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// The UTF-8 bytes of the string
    #[default]
    Utf8,
    /// Standard base64
    Base64,
}

/// Validate an inbound frame and extract its chunk bytes
///
/// Empty payloads are rejected.
pub fn decode_inbound(
    frame: InboundFrame,
    encoding: PayloadEncoding,
) -> Result<Bytes, SessionError> {
    let bytes = match frame {
        InboundFrame::Binary(bytes) => bytes,
        InboundFrame::Text(text) => {
            let envelope: InboundEnvelope = serde_json::from_str(&text)
                .map_err(|e| SessionError::MalformedMessage(format!("invalid envelope: {}", e)))?;
            match encoding {
                PayloadEncoding::Utf8 => Bytes::from(envelope.data.into_bytes()),
                PayloadEncoding::Base64 => base64::engine::general_purpose::STANDARD
                    .decode(envelope.data.as_bytes())
                    .map(Bytes::from)
                    .map_err(|e| {
                        SessionError::MalformedMessage(format!("invalid base64 data: {}", e))
                    })?,
            }
        }
    };

    if bytes.is_empty() {
        return Err(SessionError::MalformedMessage("empty payload".to_string()));
    }
    Ok(bytes)
}
