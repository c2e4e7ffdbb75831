//! WebSocket adapter for streaming sessions
//!
//! Splits an upgraded axum [`WebSocket`] into a [`WsSink`] and [`WsSource`]
//! that the core session loop drives.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use chordstream_core::protocol::OutboundMessage;
use chordstream_core::session::{InboundFrame, MessageSink, MessageSource};
use chordstream_core::TransportError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

/// Split a socket into the halves a session loop expects
pub fn split_socket(socket: WebSocket) -> (WsSink, WsSource) {
    let (tx, rx) = socket.split();
    (WsSink { tx }, WsSource { rx })
}

/// Outbound half: every message is sent as one JSON text frame
pub struct WsSink {
    tx: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let text = message.to_json()?;
        self.tx
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone
        let _ = self.tx.send(Message::Close(None)).await;
        self.tx
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// Inbound half: text and binary frames, control frames skipped
pub struct WsSource {
    rx: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            match self.rx.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(InboundFrame::Text(text))),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(InboundFrame::Binary(Bytes::from(data))))
                }
                // axum answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "client sent close frame");
                    return None;
                }
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }
}
