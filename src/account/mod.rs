/// Account directory
///
/// Read side of account management: user status, swipe counters, premium
/// tier, block list and last activity. Account creation, credentials and
/// moderation decisions belong to other services; the write methods here only
/// record their outputs.

mod directory;

pub use directory::AccountDirectory;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Account standing as decided by moderation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    UnderReview,
    TempBanned,
    PermBanned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::UnderReview => "under_review",
            UserStatus::TempBanned => "temp_banned",
            UserStatus::PermBanned => "perm_banned",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "active" => Ok(UserStatus::Active),
            "under_review" => Ok(UserStatus::UnderReview),
            "temp_banned" => Ok(UserStatus::TempBanned),
            "perm_banned" => Ok(UserStatus::PermBanned),
            _ => Err(AppError::Internal(format!("Unknown user status: {}", s))),
        }
    }

    /// Banned users may not use the service at all
    pub fn is_banned(&self) -> bool {
        matches!(self, UserStatus::TempBanned | UserStatus::PermBanned)
    }
}

/// Subscription tier, which determines the daily swipe allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PremiumTier {
    Free,
    Gold,
    Platinum,
}

impl PremiumTier {
    pub fn daily_swipe_limit(&self) -> i64 {
        match self {
            PremiumTier::Free => 8,
            PremiumTier::Gold => 60,
            PremiumTier::Platinum => 10_000,
        }
    }

    pub fn is_premium(&self) -> bool {
        !matches!(self, PremiumTier::Free)
    }
}

/// A user row as the matching engine sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub status: UserStatus,
    pub is_premium: bool,
    pub daily_swipe_limit: i64,
    pub swipes_today: i64,
    pub last_swipe_date: NaiveDate,
    pub last_activity: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Swipes already spent on `today`, applying the daily reset rule
    pub fn effective_swipes(&self, today: NaiveDate) -> i64 {
        if self.last_swipe_date < today {
            0
        } else {
            self.swipes_today
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            UserStatus::Active,
            UserStatus::UnderReview,
            UserStatus::TempBanned,
            UserStatus::PermBanned,
        ] {
            assert_eq!(UserStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(UserStatus::from_str("deleted").is_err());
        assert!(UserStatus::TempBanned.is_banned());
        assert!(!UserStatus::UnderReview.is_banned());
    }

    #[test]
    fn test_tier_limits() {
        assert_eq!(PremiumTier::Free.daily_swipe_limit(), 8);
        assert_eq!(PremiumTier::Gold.daily_swipe_limit(), 60);
        assert_eq!(PremiumTier::Platinum.daily_swipe_limit(), 10_000);
        assert!(!PremiumTier::Free.is_premium());
    }

    #[test]
    fn test_effective_swipes_resets_on_new_day() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        let mut user = UserRecord {
            id: 1,
            email: "a@example.com".into(),
            status: UserStatus::Active,
            is_premium: false,
            daily_swipe_limit: 8,
            swipes_today: 8,
            last_swipe_date: today,
            last_activity: None,
        };
        assert_eq!(user.effective_swipes(today), 8);

        user.last_swipe_date = today.pred_opt().unwrap();
        assert_eq!(user.effective_swipes(today), 0);
    }
}
