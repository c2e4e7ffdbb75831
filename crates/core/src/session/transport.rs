//! Transport seam between a session and its connection
//!
//! Transport crates implement [`MessageSink`] and [`MessageSource`] over
//! their socket type. The in-memory pair returned by [`memory_transport`]
//! drives sessions in tests and embedded use.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::OutboundMessage;

/// A message received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text frame, expected to hold a JSON envelope
    Text(String),
    /// Binary frame holding raw audio bytes
    Binary(Bytes),
}

/// Outbound half of a connection
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Close the connection after the last message
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Inbound half of a connection
#[async_trait]
pub trait MessageSource: Send {
    /// Next frame, or `None` once the peer has closed the connection
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}

/// Server-side sink of an in-memory transport
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundMessage>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.tx
            .send(message.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Server-side source of an in-memory transport
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundFrame>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Client end of an in-memory transport
#[derive(Debug)]
pub struct MemoryClient {
    inbound: Option<mpsc::Sender<InboundFrame>>,
    outbound: mpsc::Receiver<OutboundMessage>,
}

impl MemoryClient {
    /// Send a text frame; fails once the server stopped reading
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(InboundFrame::Text(text.into())).await
    }

    pub async fn send_binary(&self, bytes: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send(InboundFrame::Binary(bytes.into())).await
    }

    async fn send(&self, frame: InboundFrame) -> Result<(), TransportError> {
        let inbound = self.inbound.as_ref().ok_or(TransportError::Closed)?;
        inbound.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Next server message, `None` once the server side is gone
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    /// Hang up; the server sees end of stream
    pub fn close(&mut self) {
        self.inbound.take();
    }
}

/// Connected client and server ends sharing bounded channels
pub fn memory_transport(capacity: usize) -> (MemoryClient, ChannelSink, ChannelSource) {
    let capacity = capacity.max(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    (
        MemoryClient {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        },
        ChannelSink { tx: outbound_tx },
        ChannelSource { rx: inbound_rx },
    )
}
