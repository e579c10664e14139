/// Message persistence and read-side queries
use crate::{
    account::AccountDirectory,
    chat::{ChatHistory, ChatMessageRecord, ConversationSummary, MessageType, NewMessage, ReplySummary},
    db::{decode_time, encode_time},
    error::{AppError, AppResult},
    matching::MatchFormation,
    presence::PresenceTracker,
    profile::ProfileDirectory,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.sender_id, m.receiver_id, m.message_type, m.content, m.voice_file,
           m.parent_id, m.is_read, m.created_at,
           p.content AS parent_content,
           pp.first_name AS parent_sender_name
    FROM chat_messages m
    LEFT JOIN chat_messages p ON p.id = m.parent_id
    LEFT JOIN profiles pp ON pp.user_id = p.sender_id
"#;

/// Message store service
#[derive(Clone)]
pub struct MessageStore {
    db: SqlitePool,
    accounts: AccountDirectory,
    profiles: ProfileDirectory,
    formation: MatchFormation,
    presence: Arc<PresenceTracker>,
}

impl MessageStore {
    pub fn new(
        db: SqlitePool,
        accounts: AccountDirectory,
        profiles: ProfileDirectory,
        formation: MatchFormation,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            db,
            accounts,
            profiles,
            formation,
            presence,
        }
    }

    /// Persist a message from `sender` to `receiver`.
    ///
    /// Requires an active, unblocked match between the two.
    pub async fn send(
        &self,
        sender: i64,
        receiver: i64,
        message: &NewMessage,
    ) -> AppResult<ChatMessageRecord> {
        self.send_at(sender, receiver, message, Utc::now()).await
    }

    pub async fn send_at(
        &self,
        sender: i64,
        receiver: i64,
        message: &NewMessage,
        now: DateTime<Utc>,
    ) -> AppResult<ChatMessageRecord> {
        if sender == receiver {
            return Err(AppError::InvalidTarget("Cannot message yourself".to_string()));
        }

        self.accounts.get_user(receiver).await?;

        if self.accounts.is_blocked_between(sender, receiver).await? {
            return Err(AppError::Forbidden("You cannot message this user.".to_string()));
        }

        if !self.formation.is_matched(sender, receiver).await? {
            return Err(AppError::Forbidden("You must match before chatting".to_string()));
        }

        message.validate()?;

        if let Some(parent_id) = message.parent_id {
            let parent = self.get_message(parent_id).await?;
            let same_pair = (parent.sender == sender && parent.receiver == receiver)
                || (parent.sender == receiver && parent.receiver == sender);
            if !same_pair {
                return Err(AppError::Validation(
                    "Reply must reference a message in this conversation".to_string(),
                ));
            }
        }

        let content = match message.message_type {
            MessageType::Text => message.content.as_deref().map(str::trim),
            MessageType::Voice => message.content.as_deref(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (sender_id, receiver_id, message_type, content, voice_file,
                                       parent_id, is_read, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
            "#,
        )
        .bind(sender)
        .bind(receiver)
        .bind(message.message_type.as_str())
        .bind(content)
        .bind(&message.voice_file)
        .bind(message.parent_id)
        .bind(encode_time(&now))
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!("Message {} stored from {} to {}", id, sender, receiver);

        self.get_message(id).await
    }

    /// Fetch a single message with its reply summary
    pub async fn get_message(&self, id: i64) -> AppResult<ChatMessageRecord> {
        let row = sqlx::query(&format!("{} WHERE m.id = ?1", MESSAGE_SELECT))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", id)))?;

        parse_message(&row)
    }

    /// Conversation between `viewer` and `partner`, oldest first.
    ///
    /// Fails with `Forbidden` when either side blocked the other. Marks the
    /// partner's messages to the viewer as read and refreshes the viewer's
    /// activity. The returned records reflect read state before
    /// this call.
    pub async fn history(&self, viewer: i64, partner: i64) -> AppResult<ChatHistory> {
        self.history_at(viewer, partner, Utc::now()).await
    }

    pub async fn history_at(
        &self,
        viewer: i64,
        partner: i64,
        now: DateTime<Utc>,
    ) -> AppResult<ChatHistory> {
        if self.accounts.is_blocked_between(viewer, partner).await? {
            return Err(AppError::Forbidden("You cannot view this conversation.".to_string()));
        }

        let rows = sqlx::query(&format!(
            r#"{}
            WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
               OR (m.sender_id = ?2 AND m.receiver_id = ?1)
            ORDER BY m.created_at ASC, m.id ASC
            "#,
            MESSAGE_SELECT
        ))
        .bind(viewer)
        .bind(partner)
        .fetch_all(&self.db)
        .await?;

        let messages = rows.iter().map(parse_message).collect::<AppResult<Vec<_>>>()?;

        let marked = sqlx::query(
            "UPDATE chat_messages SET is_read = 1 WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
        )
        .bind(partner)
        .bind(viewer)
        .execute(&self.db)
        .await?;

        if marked.rows_affected() > 0 {
            tracing::debug!(
                "Marked {} messages from {} to {} as read",
                marked.rows_affected(),
                partner,
                viewer
            );
        }

        self.accounts.touch_activity(viewer, now).await?;

        let partner_status = match self.accounts.get_user(partner).await {
            Ok(record) => Some(self.presence.partner_status(&record, viewer, now)),
            Err(AppError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(ChatHistory {
            messages,
            partner_status,
        })
    }

    /// Everyone `user` has exchanged messages with, most recent first
    pub async fn conversations(&self, user: i64) -> AppResult<Vec<ConversationSummary>> {
        let blocked = self.accounts.blocked_ids(user).await?;

        let partners = sqlx::query(
            r#"
            SELECT partner, MAX(created_at) AS last_time
            FROM (
                SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS partner,
                       created_at
                FROM chat_messages
                WHERE sender_id = ?1 OR receiver_id = ?1
            )
            GROUP BY partner
            ORDER BY last_time DESC
            "#,
        )
        .bind(user)
        .fetch_all(&self.db)
        .await?;

        let mut summaries = Vec::with_capacity(partners.len());
        for row in partners {
            let partner: i64 = row.get("partner");
            if blocked.contains(&partner) {
                continue;
            }

            let last = sqlx::query(
                r#"
                SELECT message_type, content, created_at
                FROM chat_messages
                WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
                ORDER BY created_at DESC, id DESC
                LIMIT 1
                "#,
            )
            .bind(user)
            .bind(partner)
            .fetch_one(&self.db)
            .await?;

            let unread = sqlx::query(
                "SELECT COUNT(*) AS unread FROM chat_messages WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            )
            .bind(partner)
            .bind(user)
            .fetch_one(&self.db)
            .await?;

            let kind: String = last.get("message_type");
            let content: Option<String> = last.get("content");
            let time: String = last.get("created_at");
            let (name, photo) = self.profiles.summary(partner).await?;

            summaries.push(ConversationSummary {
                user_id: partner,
                name,
                photo,
                last_msg: MessageType::from_str(&kind)?.preview(content.as_deref()),
                time: decode_time(&time)?,
                unread_count: unread.get("unread"),
            });
        }

        Ok(summaries)
    }
}

fn parse_message(row: &SqliteRow) -> AppResult<ChatMessageRecord> {
    let kind: String = row.get("message_type");
    let created_at: String = row.get("created_at");
    let parent_id: Option<i64> = row.get("parent_id");

    let reply_to = parent_id.map(|id| {
        let sender: Option<String> = row.get("parent_sender_name");
        ReplySummary {
            id,
            content: row.get("parent_content"),
            sender: sender.filter(|s| !s.is_empty()).unwrap_or_else(|| "User".to_string()),
        }
    });

    Ok(ChatMessageRecord {
        id: row.get("id"),
        sender: row.get("sender_id"),
        receiver: row.get("receiver_id"),
        message_type: MessageType::from_str(&kind)?,
        content: row.get("content"),
        voice_file: row.get("voice_file"),
        parent_id,
        reply_to,
        is_read: row.get("is_read"),
        timestamp: decode_time(&created_at)?,
    })
}
