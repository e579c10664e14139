/// Presence tracking
///
/// Online status is derived from `users.last_activity`. Typing indicators are
/// ephemeral and live only in process memory; an entry older than the TTL
/// reads as "not typing" whether or not the sweeper has removed it yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::account::UserRecord;
use crate::config::PresenceConfig;

/// Status of a chat partner as seen by the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerStatus {
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_typing: bool,
}

/// Bounded TTL store of (sender, receiver) typing marks
pub struct TypingStore {
    entries: RwLock<HashMap<(i64, i64), Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl TypingStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn mark_at(&self, sender: i64, receiver: i64, at: Instant) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert((sender, receiver), at);

        if entries.len() > self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, marked| at.saturating_duration_since(*marked) < ttl);

            // Still over capacity with only fresh entries: drop the oldest
            while entries.len() > self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, marked)| **marked)
                    .map(|(key, _)| *key);
                match oldest {
                    Some(key) => {
                        entries.remove(&key);
                    }
                    None => break,
                }
            }
        }
    }

    pub fn is_marked_at(&self, sender: i64, receiver: i64, now: Instant) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(sender, receiver))
            .map_or(false, |marked| now.saturating_duration_since(*marked) < self.ttl)
    }

    /// Remove expired marks, returning how many were dropped
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, marked| now.saturating_duration_since(*marked) < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Presence tracker
pub struct PresenceTracker {
    typing: TypingStore,
    online_window: chrono::Duration,
}

impl PresenceTracker {
    pub fn new(config: &PresenceConfig) -> Self {
        Self {
            typing: TypingStore::new(
                Duration::from_secs(config.typing_ttl_secs),
                config.typing_max_entries,
            ),
            online_window: chrono::Duration::seconds(config.online_window_secs),
        }
    }

    /// `sender` is typing to `receiver`
    pub fn mark_typing(&self, sender: i64, receiver: i64) {
        self.typing.mark_at(sender, receiver, Instant::now());
    }

    pub fn is_typing(&self, sender: i64, receiver: i64) -> bool {
        self.typing.is_marked_at(sender, receiver, Instant::now())
    }

    /// Online iff the last authenticated activity falls inside the window
    pub fn is_online(&self, last_activity: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        last_activity.map_or(false, |seen| now - seen < self.online_window)
    }

    /// Status of `partner` for a viewer, including whether the partner is
    /// typing to that viewer
    pub fn partner_status(&self, partner: &UserRecord, viewer: i64, now: DateTime<Utc>) -> PartnerStatus {
        PartnerStatus {
            is_online: self.is_online(partner.last_activity, now),
            last_seen: partner.last_activity,
            is_typing: self.is_typing(partner.id, viewer),
        }
    }

    pub fn sweep(&self) -> usize {
        self.typing.sweep_at(Instant::now())
    }

    pub fn typing_entries(&self) -> usize {
        self.typing.len()
    }
}
