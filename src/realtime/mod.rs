/// Realtime gateway
///
/// Keeps every open connection of every user subscribed to that user's
/// channel and fans events out to them. Each connection owns a bounded
/// queue; a connection that cannot keep up loses the event rather than
/// stalling delivery to anyone else.

pub mod events;

pub use events::{ChatMessagePayload, ClientFrame, RealtimeEvent};

use crate::{chat::ChatMessageRecord, metrics};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Channel name for a user's events
pub fn channel_name(user_id: i64) -> String {
    format!("user:{}", user_id)
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<RealtimeEvent>,
}

/// Receiving end of one connection's subscription
pub struct Subscription {
    pub user_id: i64,
    pub connection_id: Uuid,
    pub receiver: mpsc::Receiver<RealtimeEvent>,
}

/// Per-user fan-out registry
pub struct RealtimeGateway {
    channels: RwLock<HashMap<i64, Vec<Subscriber>>>,
    buffer: usize,
}

impl RealtimeGateway {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection for `user_id`
    pub fn subscribe(&self, user_id: i64) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let connection_id = Uuid::new_v4();

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(user_id)
            .or_default()
            .push(Subscriber { id: connection_id, tx });

        metrics::record_realtime_connection(true);
        tracing::debug!("Connection {} joined {}", connection_id, channel_name(user_id));

        Subscription {
            user_id,
            connection_id,
            receiver,
        }
    }

    /// Remove a connection; unknown ids are ignored
    pub fn unsubscribe(&self, user_id: i64, connection_id: Uuid) {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = channels.get_mut(&user_id) else {
            return;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != connection_id);
        if subscribers.len() < before {
            metrics::record_realtime_connection(false);
            tracing::debug!("Connection {} left {}", connection_id, channel_name(user_id));
        }
        if subscribers.is_empty() {
            channels.remove(&user_id);
        }
    }

    /// Deliver `event` to every connection of `user_id`.
    ///
    /// Returns the number of connections that accepted it. Never blocks.
    pub fn publish(&self, user_id: i64, event: RealtimeEvent) -> usize {
        let targets: Vec<(Uuid, mpsc::Sender<RealtimeEvent>)> = {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            match channels.get(&user_id) {
                Some(subscribers) => subscribers.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return 0,
            }
        };

        let kind = event.kind();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_realtime_delivery(kind, "delivered");
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Connection {} is lagging, dropped {} event", id, kind);
                    metrics::record_realtime_delivery(kind, "dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    metrics::record_realtime_delivery(kind, "closed");
                    closed.push(id);
                }
            }
        }

        for id in closed {
            self.unsubscribe(user_id, id);
        }

        delivered
    }

    /// Fan a stored message out to both participants
    pub fn publish_chat_message(&self, record: &ChatMessageRecord) -> usize {
        let to_receiver = RealtimeEvent::ChatMessage {
            message: ChatMessagePayload::from_record(record, false),
        };
        let to_sender = RealtimeEvent::ChatMessage {
            message: ChatMessagePayload::from_record(record, true),
        };

        self.publish(record.receiver, to_receiver) + self.publish(record.sender, to_sender)
    }

    /// Tell `receiver` that `sender` is typing
    pub fn publish_typing(&self, sender: i64, receiver: i64) -> usize {
        self.publish(receiver, RealtimeEvent::Typing { sender_id: sender })
    }

    /// Drop subscribers whose receiving side has gone away
    pub fn prune_closed(&self) -> usize {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;

        channels.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| !s.tx.is_closed());
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });

        for _ in 0..removed {
            metrics::record_realtime_connection(false);
        }
        removed
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(&user_id).map_or(0, Vec::len)
    }

    pub fn total_connections(&self) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MessageType;
    use chrono::Utc;

    fn record(sender: i64, receiver: i64) -> ChatMessageRecord {
        ChatMessageRecord {
            id: 1,
            sender,
            receiver,
            message_type: MessageType::Text,
            content: Some("hello".into()),
            voice_file: None,
            parent_id: None,
            reply_to: None,
            is_read: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_every_connection_receives_event() {
        let gateway = RealtimeGateway::new(8);
        let mut phone = gateway.subscribe(1);
        let mut laptop = gateway.subscribe(1);
        let mut other = gateway.subscribe(2);

        assert_eq!(gateway.publish_typing(2, 1), 2);

        assert_eq!(phone.receiver.recv().await, Some(RealtimeEvent::Typing { sender_id: 2 }));
        assert_eq!(laptop.receiver.recv().await, Some(RealtimeEvent::Typing { sender_id: 2 }));
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chat_message_sets_is_me_per_side() {
        let gateway = RealtimeGateway::new(8);
        let mut sender = gateway.subscribe(1);
        let mut receiver = gateway.subscribe(2);

        assert_eq!(gateway.publish_chat_message(&record(1, 2)), 2);

        match receiver.receiver.recv().await {
            Some(RealtimeEvent::ChatMessage { message }) => assert!(!message.is_me),
            other => panic!("unexpected event: {:?}", other),
        }
        match sender.receiver.recv().await {
            Some(RealtimeEvent::ChatMessage { message }) => assert!(message.is_me),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_connection_does_not_block_others() {
        let gateway = RealtimeGateway::new(1);
        let _slow = gateway.subscribe(1);
        let mut fast = gateway.subscribe(1);

        assert_eq!(gateway.publish_typing(5, 1), 2);
        fast.receiver.recv().await.unwrap();

        // The slow queue is full; only the fast one accepts
        assert_eq!(gateway.publish_typing(6, 1), 1);
        assert_eq!(fast.receiver.recv().await, Some(RealtimeEvent::Typing { sender_id: 6 }));
        assert_eq!(gateway.connection_count(1), 2);
    }

    #[tokio::test]
    async fn test_closed_connections_are_removed() {
        let gateway = RealtimeGateway::new(4);
        let sub = gateway.subscribe(3);
        let kept = gateway.subscribe(3);
        drop(sub);

        assert_eq!(gateway.publish_typing(1, 3), 1);
        assert_eq!(gateway.connection_count(3), 1);

        drop(kept);
        assert_eq!(gateway.prune_closed(), 1);
        assert_eq!(gateway.total_connections(), 0);
        assert_eq!(gateway.publish_typing(1, 3), 0);
    }

    #[test]
    fn test_unsubscribe_and_channel_name() {
        let gateway = RealtimeGateway::new(4);
        let sub = gateway.subscribe(9);
        gateway.unsubscribe(9, sub.connection_id);
        gateway.unsubscribe(9, sub.connection_id);
        assert_eq!(gateway.connection_count(9), 0);
        assert_eq!(channel_name(9), "user:9");
    }
}
