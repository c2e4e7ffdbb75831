//! Live session registry and outbound delivery
//!
//! [`SessionManager`] is the only owner of the registry. Each [`Session`]
//! gets a bounded outbound channel drained by a delivery pump that writes
//! to the transport's [`MessageSink`]. When a send fails the session is
//! disconnected: its tasks are aborted, its channel closed and its registry
//! entry removed, exactly once no matter how many callers race.

mod fanout;
mod transport;

pub use fanout::{BroadcastFanout, Fanout, FanoutError, FanoutEvent};
pub use transport::{
    memory_transport, ChannelSink, ChannelSource, InboundFrame, MemoryClient, MessageSink,
    MessageSource,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use crate::error::SessionError;
use crate::protocol::OutboundMessage;

/// Default outbound queue depth per session
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// One live connection
///
/// Tasks attached with [`Session::attach`] share a single cancellation
/// scope: `shutdown` aborts all of them together.
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    outbound: Mutex<Option<mpsc::Sender<OutboundMessage>>>,
    state: Mutex<SessionState>,
    tasks: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Session {
    fn new(outbound: mpsc::Sender<OutboundMessage>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            outbound: Mutex::new(Some(outbound)),
            state: Mutex::new(SessionState::Connecting),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Record a lifecycle transition; `Closed` is terminal
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != SessionState::Closed {
            *current = state;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Put a task under this session's cancellation scope
    ///
    /// A task attached after shutdown is aborted immediately.
    pub fn attach<T>(&self, handle: &JoinHandle<T>) {
        let mut tasks = self.tasks.lock();
        if self.is_closed() {
            handle.abort();
        } else {
            tasks.push(handle.abort_handle());
        }
    }

    /// Resolves once the session has been shut down
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), SessionError> {
        let sender = self
            .outbound
            .lock()
            .clone()
            .ok_or(SessionError::SessionClosed(self.id))?;

        sender
            .send(message)
            .await
            .map_err(|_| SessionError::TransportFailure {
                session_id: self.id,
                reason: "outbound channel closed".to_string(),
            })
    }

    /// Abort owned tasks and close the outbound channel; runs once
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        self.outbound.lock().take();
        *self.state.lock() = SessionState::Closed;
        self.closed_tx.send_replace(true);

        tracing::debug!(session_id = %self.id, aborted = tasks.len(), "Session shut down");
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .finish()
    }
}

/// Summary of a live session for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

/// Registry of live sessions
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
    outbound_capacity: usize,
    fanout: Option<Arc<dyn Fanout>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("outbound_capacity", &self.outbound_capacity)
            .field("fanout", &self.fanout.is_some())
            .finish()
    }
}

impl SessionManager {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            outbound_capacity: outbound_capacity.max(1),
            fanout: None,
        }
    }

    /// Publish every delivered message to `fanout` as well
    pub fn with_fanout(mut self, fanout: Arc<dyn Fanout>) -> Self {
        self.fanout = Some(fanout);
        self
    }

    /// Register a connection and start its delivery pump
    pub fn connect(&self, sink: Box<dyn MessageSink>) -> Arc<Session> {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let session = Arc::new(Session::new(tx));
        self.sessions.insert(session.id, Arc::clone(&session));

        tokio::spawn(self.clone().deliver(session.id, rx, sink));

        tracing::info!(session_id = %session.id, active = self.sessions.len(), "Session connected");
        session
    }

    async fn deliver(
        self,
        session_id: Uuid,
        mut rx: mpsc::Receiver<OutboundMessage>,
        mut sink: Box<dyn MessageSink>,
    ) {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sink.send(&message).await {
                tracing::warn!(%session_id, kind = message.kind(), "Delivery failed: {}", e);
                self.disconnect(session_id);
                return;
            }
            if let Some(fanout) = &self.fanout {
                if let Err(e) = fanout.publish(session_id, &message) {
                    tracing::warn!(
                        %session_id,
                        "Fan-out publish failed, delivering locally only: {}",
                        e
                    );
                }
            }
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(%session_id, "Error closing sink: {}", e);
        }
    }

    /// Queue a message for one session
    ///
    /// A closed channel disconnects the session and returns
    /// `SessionError::TransportFailure`.
    pub async fn send(
        &self,
        session: &Session,
        message: OutboundMessage,
    ) -> Result<(), SessionError> {
        match session.send(message).await {
            Ok(()) => Ok(()),
            Err(e @ SessionError::TransportFailure { .. }) => {
                self.disconnect(session.id);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Queue a message for every live session, returning how many accepted it
    pub async fn broadcast(&self, message: OutboundMessage) -> usize {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut delivered = 0;
        for session in sessions {
            if self.send(&session, message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Tear a session down; returns false if it was already gone
    pub fn disconnect(&self, session_id: Uuid) -> bool {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return false;
        };
        session.shutdown();
        tracing::info!(%session_id, active = self.sessions.len(), "Session disconnected");
        true
    }

    /// Disconnect every live session
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.disconnect(*id)).count()
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| SessionInfo {
                id: entry.id,
                created_at: entry.created_at,
                state: entry.state(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_reaches_sink() {
        let manager = SessionManager::default();
        let (mut client, sink, _source) = memory_transport(8);
        let session = manager.connect(Box::new(sink));

        manager.send(&session, OutboundMessage::ack()).await.unwrap();
        assert_eq!(client.recv().await, Some(OutboundMessage::ack()));
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = SessionManager::default();
        let (_client, sink, _source) = memory_transport(8);
        let session = manager.connect(Box::new(sink));

        assert!(manager.disconnect(session.id()));
        assert!(!manager.disconnect(session.id()));
        assert!(session.is_closed());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(manager.session_count(), 0);

        let err = manager.send(&session, OutboundMessage::ping()).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionClosed(_)));
    }

    #[tokio::test]
    async fn test_disconnect_aborts_attached_tasks() {
        let manager = SessionManager::default();
        let (_client, sink, _source) = memory_transport(8);
        let session = manager.connect(Box::new(sink));

        let task = tokio::spawn(std::future::pending::<()>());
        session.attach(&task);
        manager.disconnect(session.id());

        let joined = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap();
        assert!(joined.unwrap_err().is_cancelled());

        let late = tokio::spawn(std::future::pending::<()>());
        session.attach(&late);
        assert!(late.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_disconnect() {
        let manager = SessionManager::default();
        let (_client, sink, _source) = memory_transport(8);
        let session = manager.connect(Box::new(sink));

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.closed().await })
        };
        manager.disconnect(session.id());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_counts_live_sessions() {
        let manager = SessionManager::default();
        let (mut a, sink_a, _src_a) = memory_transport(8);
        let (mut b, sink_b, _src_b) = memory_transport(8);
        manager.connect(Box::new(sink_a));
        manager.connect(Box::new(sink_b));

        assert_eq!(manager.broadcast(OutboundMessage::ping()).await, 2);
        assert_eq!(a.recv().await, Some(OutboundMessage::ping()));
        assert_eq!(b.recv().await, Some(OutboundMessage::ping()));
    }

    /// Fan-out that is always down and counts attempts
    #[derive(Default)]
    struct OfflineFanout {
        attempts: std::sync::atomic::AtomicUsize,
    }

    impl Fanout for OfflineFanout {
        fn publish(
            &self,
            _session_id: Uuid,
            _message: &OutboundMessage,
        ) -> Result<(), FanoutError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(FanoutError::Unavailable("broker unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fanout_failure_delivers_locally() {
        let fanout = Arc::new(OfflineFanout::default());
        let manager = SessionManager::default().with_fanout(fanout.clone());
        let (mut client, sink, _source) = memory_transport(8);
        let session = manager.connect(Box::new(sink));

        manager.send(&session, OutboundMessage::ready()).await.unwrap();
        manager.send(&session, OutboundMessage::ack()).await.unwrap();
        assert_eq!(client.recv().await, Some(OutboundMessage::ready()));
        assert_eq!(client.recv().await, Some(OutboundMessage::ack()));

        // Publishing happens after the sink write; wait for the second attempt
        tokio::time::timeout(Duration::from_secs(1), async {
            while fanout.attempts.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(!session.is_closed());
        assert_eq!(manager.session_count(), 1);
        assert!(manager.get(session.id()).is_some());
    }
}
