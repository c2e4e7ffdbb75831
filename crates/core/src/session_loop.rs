//! Per-connection control loop
//!
//! A streaming connection moves through `Connecting → Active → Draining →
//! Closed`. While active it runs three tasks under the session's
//! cancellation scope:
//!
//! - heartbeat: `{"type": "ping"}` every `heartbeat_interval`
//! - processing: pulls windows from the [`AdaptiveBuffer`] and sends results
//! - receive: validates inbound frames, feeds the buffer and acks
//!
//! When any of the three ends (or any send fails), all three are aborted
//! together. An inference call already running on the blocking pool is
//! abandoned rather than awaited, so teardown never waits on a model.

use futures::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::buffer::{AdaptiveBuffer, AudioChunk, BufferConfig};
use crate::error::BufferError;
use crate::pipeline::InferencePipeline;
use crate::protocol::{decode_inbound, OutboundMessage, PayloadEncoding};
use crate::session::{MessageSink, MessageSource, Session, SessionManager, SessionState};

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Tunables for a streaming session
#[derive(Debug, Clone)]
pub struct SessionLoopConfig {
    /// Period between pings; the first ping goes out one period after connect
    pub heartbeat_interval: Duration,
    /// How text frame `data` strings become bytes
    pub payload_encoding: PayloadEncoding,
    /// Buffer settings applied to every new session
    pub buffer: BufferConfig,
}

impl Default for SessionLoopConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            payload_encoding: PayloadEncoding::default(),
            buffer: BufferConfig::default(),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection
    ClientClosed,
    /// Reading from the transport failed
    TransportError(String),
    /// The session was disconnected by a failed send or by the server
    Disconnected,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => f.write_str("client closed"),
            CloseReason::TransportError(e) => write!(f, "transport error: {}", e),
            CloseReason::Disconnected => f.write_str("disconnected"),
        }
    }
}

#[derive(Debug, Default)]
struct LoopCounters {
    chunks_accepted: AtomicU64,
    chunks_rejected: AtomicU64,
    malformed: AtomicU64,
    windows_processed: AtomicU64,
}

/// What happened during one session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub reason: CloseReason,
    pub chunks_accepted: u64,
    /// Chunks refused for capacity
    pub chunks_rejected: u64,
    pub malformed: u64,
    pub windows_processed: u64,
    pub duration: Duration,
}

/// Drives streaming sessions against a shared manager and pipeline
#[derive(Debug, Clone)]
pub struct SessionLoop {
    manager: SessionManager,
    pipeline: Arc<InferencePipeline>,
    config: SessionLoopConfig,
}

impl SessionLoop {
    pub fn new(
        manager: SessionManager,
        pipeline: Arc<InferencePipeline>,
        config: SessionLoopConfig,
    ) -> Self {
        Self {
            manager,
            pipeline,
            config,
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn config(&self) -> &SessionLoopConfig {
        &self.config
    }

    /// Run one connection to completion
    pub async fn run<S>(&self, source: S, sink: Box<dyn MessageSink>) -> SessionSummary
    where
        S: MessageSource + 'static,
    {
        let started = Instant::now();
        let session = self.manager.connect(sink);
        let session_id = session.id();
        let span = tracing::info_span!("session", %session_id);
        let counters = Arc::new(LoopCounters::default());
        let buffer = Arc::new(AdaptiveBuffer::new(self.config.buffer.clone()));

        async {
            let reason = self.drive(&session, source, &buffer, &counters).await;

            session.set_state(SessionState::Draining);
            buffer.close();
            self.manager.disconnect(session_id);

            let summary = SessionSummary {
                session_id,
                reason,
                chunks_accepted: counters.chunks_accepted.load(Ordering::Relaxed),
                chunks_rejected: counters.chunks_rejected.load(Ordering::Relaxed),
                malformed: counters.malformed.load(Ordering::Relaxed),
                windows_processed: counters.windows_processed.load(Ordering::Relaxed),
                duration: started.elapsed(),
            };
            tracing::info!(
                reason = %summary.reason,
                chunks = summary.chunks_accepted,
                windows = summary.windows_processed,
                duration_ms = summary.duration.as_millis() as u64,
                "Session closed"
            );
            summary
        }
        .instrument(span)
        .await
    }

    /// Active phase: returns once the receive task ends or the session is disconnected
    async fn drive<S>(
        &self,
        session: &Arc<Session>,
        source: S,
        buffer: &Arc<AdaptiveBuffer>,
        counters: &Arc<LoopCounters>,
    ) -> CloseReason
    where
        S: MessageSource + 'static,
    {
        if self.manager.send(session, OutboundMessage::ready()).await.is_err() {
            return CloseReason::Disconnected;
        }
        session.set_state(SessionState::Active);

        let mut heartbeat = tokio::spawn(
            heartbeat(self.manager.clone(), Arc::clone(session), self.config.heartbeat_interval)
                .in_current_span(),
        );
        session.attach(&heartbeat);

        let mut processing = tokio::spawn(
            process(
                self.manager.clone(),
                Arc::clone(session),
                Arc::clone(&self.pipeline),
                Arc::clone(buffer),
                Arc::clone(counters),
            )
            .in_current_span(),
        );
        session.attach(&processing);

        let mut receiver = tokio::spawn(
            receive(
                self.manager.clone(),
                Arc::clone(session),
                source,
                Arc::clone(buffer),
                Arc::clone(counters),
                self.config.payload_encoding,
            )
            .in_current_span(),
        );
        session.attach(&receiver);

        // Whichever task ends first ends the session; run() aborts the rest
        tokio::select! {
            biased;
            joined = &mut receiver => match joined {
                Ok(reason) => reason,
                Err(e) if e.is_cancelled() => CloseReason::Disconnected,
                Err(e) => CloseReason::TransportError(format!("receive task failed: {}", e)),
            },
            joined = &mut processing => task_ended("processing", joined),
            joined = &mut heartbeat => task_ended("heartbeat", joined),
            _ = session.closed() => CloseReason::Disconnected,
        }
    }
}

/// Close reason for a heartbeat or processing task that stopped first
fn task_ended(task: &str, joined: Result<(), tokio::task::JoinError>) -> CloseReason {
    match joined {
        Ok(()) => CloseReason::Disconnected,
        Err(e) if e.is_cancelled() => CloseReason::Disconnected,
        Err(e) => {
            tracing::error!(task, "Session task failed: {}", e);
            CloseReason::TransportError(format!("{} task failed: {}", task, e))
        }
    }
}

async fn heartbeat(manager: SessionManager, session: Arc<Session>, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if manager.send(&session, OutboundMessage::ping()).await.is_err() {
            break;
        }
    }
}

async fn process(
    manager: SessionManager,
    session: Arc<Session>,
    pipeline: Arc<InferencePipeline>,
    buffer: Arc<AdaptiveBuffer>,
    counters: Arc<LoopCounters>,
) {
    let mut windows = Box::pin(buffer.features());
    while let Some(window) = windows.next().await {
        let message = match pipeline.process_window(&window).await {
            Ok(result) => OutboundMessage::from(result),
            Err(e) => OutboundMessage::error(e.to_string()),
        };
        counters.windows_processed.fetch_add(1, Ordering::Relaxed);
        if manager.send(&session, message).await.is_err() {
            break;
        }
    }
}

async fn receive<S: MessageSource>(
    manager: SessionManager,
    session: Arc<Session>,
    mut source: S,
    buffer: Arc<AdaptiveBuffer>,
    counters: Arc<LoopCounters>,
    encoding: PayloadEncoding,
) -> CloseReason {
    loop {
        let frame = match source.recv().await {
            None => return CloseReason::ClientClosed,
            Some(Err(e)) => return CloseReason::TransportError(e.to_string()),
            Some(Ok(frame)) => frame,
        };

        let reply = match decode_inbound(frame, encoding) {
            Err(e) => {
                tracing::warn!("Rejecting inbound message: {}", e);
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                OutboundMessage::error(e.to_string())
            }
            Ok(bytes) => match buffer.add(AudioChunk::new(bytes)) {
                Ok(()) => {
                    counters.chunks_accepted.fetch_add(1, Ordering::Relaxed);
                    OutboundMessage::ack()
                }
                Err(e @ BufferError::CapacityExceeded { .. }) => {
                    tracing::warn!("Throttling sender: {}", e);
                    counters.chunks_rejected.fetch_add(1, Ordering::Relaxed);
                    OutboundMessage::error(e.to_string())
                }
                Err(BufferError::Closed) => return CloseReason::Disconnected,
            },
        };

        if manager.send(&session, reply).await.is_err() {
            return CloseReason::Disconnected;
        }
    }
}
