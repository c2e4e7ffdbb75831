//! Shared fan-out of delivered messages
//!
//! A [`Fanout`] sees every message the session manager delivers. Failures
//! never affect local delivery.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::OutboundMessage;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("fan-out unavailable: {0}")]
    Unavailable(String),
}

/// Publishes delivered messages beyond the local process
pub trait Fanout: Send + Sync {
    fn publish(&self, session_id: Uuid, message: &OutboundMessage) -> Result<(), FanoutError>;
}

/// A delivered message tagged with its session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanoutEvent {
    pub session_id: Uuid,
    pub message: OutboundMessage,
}

/// In-process fan-out over a tokio broadcast channel
///
/// Slow subscribers lag and lose events rather than slowing delivery.
#[derive(Debug, Clone)]
pub struct BroadcastFanout {
    tx: broadcast::Sender<FanoutEvent>,
}

impl BroadcastFanout {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FanoutEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastFanout {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Fanout for BroadcastFanout {
    fn publish(&self, session_id: Uuid, message: &OutboundMessage) -> Result<(), FanoutError> {
        // No subscribers is not an error
        let _ = self.tx.send(FanoutEvent {
            session_id,
            message: message.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let fanout = BroadcastFanout::new(4);
        let mut rx = fanout.subscribe();
        let id = Uuid::new_v4();

        fanout.publish(id, &OutboundMessage::ack()).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id, id);
        assert_eq!(event.message, OutboundMessage::ack());
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let fanout = BroadcastFanout::default();
        assert_eq!(fanout.subscriber_count(), 0);
        assert!(fanout.publish(Uuid::new_v4(), &OutboundMessage::ping()).is_ok());
    }
}
