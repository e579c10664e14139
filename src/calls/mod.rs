/// Call signaling
///
/// Stores the offer/answer exchange for a call between two matched users
/// and moves the call through its lifecycle:
///
/// ```text
/// initiated -> active -> ended
/// initiated -> rejected
/// initiated -> ended
/// ```
///
/// `ended` and `rejected` are terminal. Every transition is a conditional
/// update on the call id, so concurrent callers cannot both win.

mod signaling;

pub use signaling::CallSignaling;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Active,
    Ended,
    Rejected,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "initiated" => Ok(CallStatus::Initiated),
            "active" => Ok(CallStatus::Active),
            "ended" => Ok(CallStatus::Ended),
            "rejected" => Ok(CallStatus::Rejected),
            _ => Err(AppError::Internal(format!("Unknown call status: {}", s))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Rejected)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        matches!(
            (self, next),
            (CallStatus::Initiated, CallStatus::Active)
                | (CallStatus::Initiated, CallStatus::Rejected)
                | (CallStatus::Initiated, CallStatus::Ended)
                | (CallStatus::Active, CallStatus::Ended)
        )
    }
}

/// A call as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallView {
    pub id: i64,
    pub caller: i64,
    pub receiver: i64,
    pub caller_name: String,
    pub status: CallStatus,
    pub sdp_offer: Option<String>,
    pub sdp_answer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time view of the calls a user should react to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallPoll {
    /// A call ringing for this user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming: Option<CallView>,
    /// The user's own outgoing call, if it changed recently
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_call: Option<CallView>,
    /// An incoming call that was just ended or rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming_update: Option<CallView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use CallStatus::*;
        let all = [Initiated, Active, Ended, Rejected];
        let allowed = [
            (Initiated, Active),
            (Initiated, Rejected),
            (Initiated, Ended),
            (Active, Ended),
        ];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_empty_poll_serializes_to_empty_object() {
        let json = serde_json::to_string(&CallPoll::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
