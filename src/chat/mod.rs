/// Messaging store
///
/// Persists chat messages between matched users and serves history and the
/// conversation list. Fan-out is not triggered from here: callers persist
/// through [`MessageStore::send`] and then hand the returned record to the
/// realtime gateway.

mod store;

pub use store::MessageStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    presence::PartnerStatus,
};

/// Message payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Voice,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Voice => "voice",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "text" => Ok(MessageType::Text),
            "voice" => Ok(MessageType::Voice),
            _ => Err(AppError::Validation(format!("Invalid message type: {}", s))),
        }
    }

    /// One-line preview used by match and conversation lists
    pub fn preview(&self, content: Option<&str>) -> String {
        match self {
            MessageType::Text => content.unwrap_or_default().to_string(),
            MessageType::Voice => "Voice message".to_string(),
        }
    }
}

/// Summary of the message being replied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySummary {
    pub id: i64,
    pub content: Option<String>,
    /// First name of the original sender
    pub sender: String,
}

/// A persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    pub id: i64,
    pub sender: i64,
    pub receiver: i64,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub voice_file: Option<String>,
    #[serde(rename = "parent_message")]
    pub parent_id: Option<i64>,
    pub reply_to: Option<ReplySummary>,
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Message creation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub message_type: MessageType,
    pub content: Option<String>,
    /// Reference to media stored elsewhere
    pub voice_file: Option<String>,
    #[serde(alias = "parent_message")]
    pub parent_id: Option<i64>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Reject empty payloads and off-platform contact details
    pub fn validate(&self) -> AppResult<()> {
        match self.message_type {
            MessageType::Text => {
                let empty = self.content.as_deref().map_or(true, |c| c.trim().is_empty());
                if empty {
                    return Err(AppError::Validation("Message content is required".to_string()));
                }
            }
            MessageType::Voice => {
                if self.voice_file.as_deref().map_or(true, str::is_empty) {
                    return Err(AppError::Validation(
                        "Voice message requires a voice file".to_string(),
                    ));
                }
            }
        }

        if let Some(content) = &self.content {
            if content.contains("http") || content.contains('@') {
                return Err(AppError::Validation(
                    "External links and emails are not allowed for safety.".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Chat history between the caller and one partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessageRecord>,
    pub partner_status: Option<PartnerStatus>,
}

/// Conversation list entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub user_id: i64,
    pub name: String,
    pub photo: Option<String>,
    pub last_msg: String,
    pub time: DateTime<Utc>,
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(MessageType::Text.preview(Some("hi there")), "hi there");
        assert_eq!(MessageType::Voice.preview(None), "Voice message");
        assert_eq!(MessageType::Text.preview(None), "");
    }

    #[test]
    fn test_validation_rules() {
        assert!(NewMessage::text("see you at 7").validate().is_ok());
        assert!(NewMessage::text("   ").validate().is_err());
        assert!(NewMessage::text("find me on https://example.com").validate().is_err());
        assert!(NewMessage::text("mail me at me@example.com").validate().is_err());

        let voice = NewMessage {
            message_type: MessageType::Voice,
            voice_file: Some("chat_voice/1.ogg".into()),
            ..Default::default()
        };
        assert!(voice.validate().is_ok());

        let empty_voice = NewMessage {
            message_type: MessageType::Voice,
            ..Default::default()
        };
        assert!(empty_voice.validate().is_err());
    }
}
