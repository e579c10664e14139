/// Swipe ledger and match formation
///
/// A swipe is one decision per ordered (swiper, target) pair. A match is an
/// unordered pair stored as `(user_low, user_high)`; the unique key on that
/// pair is what makes formation idempotent under concurrent likes.

pub mod formation;
pub mod ledger;

pub use formation::MatchFormation;
pub use ledger::SwipeLedger;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Swipe decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAction {
    Like,
    Dislike,
}

impl SwipeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwipeAction::Like => "like",
            SwipeAction::Dislike => "dislike",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "like" => Ok(SwipeAction::Like),
            "dislike" => Ok(SwipeAction::Dislike),
            _ => Err(AppError::Validation(format!("Invalid swipe action: {}", s))),
        }
    }
}

/// Result of recording a swipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeOutcome {
    pub is_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<i64>,
    /// Swipes left today after this one
    pub swipes_remaining: i64,
}

/// Match list entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    pub match_id: i64,
    pub user_id: i64,
    pub name: String,
    pub photo: Option<String>,
    pub last_message_preview: String,
}

/// Order-independent key for a pair of users
pub fn pair_key(a: i64, b: i64) -> (i64, i64) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
