/// Account directory implementation using runtime queries
use crate::{
    account::{PremiumTier, UserRecord, UserStatus},
    db::{decode_date, decode_time_opt, encode_date, encode_time},
    error::{AppError, AppResult},
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

/// Account directory service
#[derive(Clone)]
pub struct AccountDirectory {
    db: SqlitePool,
}

impl AccountDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register a user row (fed by account management)
    pub async fn create_user(&self, email: &str, tier: PremiumTier) -> AppResult<UserRecord> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO users (email, status, is_premium, daily_swipe_limit, swipes_today,
                               last_swipe_date, created_at)
            VALUES (?1, 'active', ?2, ?3, 0, ?4, ?5)
            "#,
        )
        .bind(email)
        .bind(tier.is_premium())
        .bind(tier.daily_swipe_limit())
        .bind(encode_date(&now.date_naive()))
        .bind(encode_time(&now))
        .execute(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict(format!("Email {} already registered", email))
            }
            other => AppError::Database(other),
        })?;

        self.get_user(result.last_insert_rowid()).await
    }

    /// Fetch a user by id
    pub async fn get_user(&self, id: i64) -> AppResult<UserRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, email, status, is_premium, daily_swipe_limit, swipes_today,
                   last_swipe_date, last_activity
            FROM users
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        let status: String = row.get("status");
        let last_swipe_date: String = row.get("last_swipe_date");

        Ok(UserRecord {
            id: row.get("id"),
            email: row.get("email"),
            status: UserStatus::from_str(&status)?,
            is_premium: row.get("is_premium"),
            daily_swipe_limit: row.get("daily_swipe_limit"),
            swipes_today: row.get("swipes_today"),
            last_swipe_date: decode_date(&last_swipe_date)?,
            last_activity: decode_time_opt(row.get("last_activity"))?,
        })
    }

    /// Record that the user did something authenticated just now
    pub async fn touch_activity(&self, id: i64, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_activity = ?1 WHERE id = ?2")
            .bind(encode_time(&at))
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Apply a moderation outcome
    pub async fn set_status(&self, id: i64, status: UserStatus) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        tracing::info!("User {} status set to {}", id, status.as_str());
        Ok(())
    }

    /// Apply a payment outcome; swipes already spent today are kept
    pub async fn set_tier(&self, id: i64, tier: PremiumTier) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_premium = ?1, daily_swipe_limit = ?2 WHERE id = ?3",
        )
        .bind(tier.is_premium())
        .bind(tier.daily_swipe_limit())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        Ok(())
    }

    /// Record a directed block. Blocking twice is a no-op.
    pub async fn block(&self, blocker: i64, blocked: i64) -> AppResult<()> {
        if blocker == blocked {
            return Err(AppError::InvalidTarget("Cannot block yourself".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO blocks (blocker_id, blocked_id, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(blocker_id, blocked_id) DO NOTHING
            "#,
        )
        .bind(blocker)
        .bind(blocked)
        .bind(encode_time(&Utc::now()))
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// True if either user has blocked the other
    pub async fn is_blocked_between(&self, a: i64, b: i64) -> AppResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM blocks
                WHERE (blocker_id = ?1 AND blocked_id = ?2)
                   OR (blocker_id = ?2 AND blocked_id = ?1)
            ) AS blocked
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.db)
        .await?;

        Ok(row.get::<bool, _>("blocked"))
    }

    /// Every user blocked by, or blocking, `user`
    pub async fn blocked_ids(&self, user: i64) -> AppResult<HashSet<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT blocked_id AS other FROM blocks WHERE blocker_id = ?1
            UNION
            SELECT blocker_id AS other FROM blocks WHERE blocked_id = ?1
            "#,
        )
        .bind(user)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("other")).collect())
    }
}
