/// Realtime event types
use crate::chat::{ChatMessageRecord, MessageType, ReplySummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event pushed to a user's channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    ChatMessage { message: ChatMessagePayload },
    Typing { sender_id: i64 },
}

impl RealtimeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::ChatMessage { .. } => "chat_message",
            RealtimeEvent::Typing { .. } => "typing",
        }
    }
}

/// Message as delivered to one side of the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessagePayload {
    pub id: i64,
    pub content: Option<String>,
    pub sender: i64,
    pub receiver: i64,
    /// True on the copy delivered to the sender
    pub is_me: bool,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
    pub voice_file: Option<String>,
    pub reply_to: Option<ReplySummary>,
}

impl ChatMessagePayload {
    pub fn from_record(record: &ChatMessageRecord, is_me: bool) -> Self {
        Self {
            id: record.id,
            content: record.content.clone(),
            sender: record.sender,
            receiver: record.receiver,
            is_me,
            timestamp: record.timestamp,
            message_type: record.message_type,
            voice_file: record.voice_file.clone(),
            reply_to: record.reply_to.clone(),
        }
    }
}

/// Frame sent by a client over its realtime connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Typing { receiver_id: i64 },
}
