/// Swipe ledger with daily quotas
use crate::{
    account::AccountDirectory,
    db::{encode_date, encode_time},
    error::{AppError, AppResult},
    matching::{MatchFormation, SwipeAction, SwipeOutcome},
    metrics,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Swipe ledger service
#[derive(Clone)]
pub struct SwipeLedger {
    db: SqlitePool,
    accounts: AccountDirectory,
    formation: MatchFormation,
}

impl SwipeLedger {
    pub fn new(db: SqlitePool, accounts: AccountDirectory, formation: MatchFormation) -> Self {
        Self {
            db,
            accounts,
            formation,
        }
    }

    /// Record `actor`'s decision about `target`
    pub async fn record_swipe(
        &self,
        actor: i64,
        target: i64,
        action: SwipeAction,
    ) -> AppResult<SwipeOutcome> {
        self.record_swipe_at(actor, target, action, Utc::now()).await
    }

    /// Record a swipe as of `now`; the calendar day of `now` drives the quota reset
    pub async fn record_swipe_at(
        &self,
        actor: i64,
        target: i64,
        action: SwipeAction,
        now: DateTime<Utc>,
    ) -> AppResult<SwipeOutcome> {
        if actor == target {
            return Err(AppError::InvalidTarget("Cannot swipe on yourself".to_string()));
        }

        // Target must exist
        self.accounts.get_user(target).await?;

        if self.accounts.is_blocked_between(actor, target).await? {
            return Err(AppError::Forbidden(format!(
                "User {} is not available",
                target
            )));
        }

        let today = encode_date(&now.date_naive());
        let mut tx = self.db.begin().await?;

        // Reserve one unit of quota. The reset to zero for a new day and the
        // limit check happen in the same statement as the increment.
        let reserved = sqlx::query(
            r#"
            UPDATE users
            SET swipes_today = CASE WHEN last_swipe_date < ?1 THEN 1 ELSE swipes_today + 1 END,
                last_swipe_date = ?1
            WHERE id = ?2
              AND daily_swipe_limit > 0
              AND (last_swipe_date < ?1 OR swipes_today < daily_swipe_limit)
            RETURNING swipes_today, daily_swipe_limit
            "#,
        )
        .bind(&today)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(reserved) = reserved else {
            drop(tx);
            let user = self.accounts.get_user(actor).await?;
            tracing::debug!(
                "Swipe by {} rejected: {} of {} used",
                actor,
                user.effective_swipes(now.date_naive()),
                user.daily_swipe_limit
            );
            metrics::record_quota_rejection();
            return Err(AppError::QuotaExceeded {
                limit: user.daily_swipe_limit,
            });
        };

        let used: i64 = reserved.get("swipes_today");
        let limit: i64 = reserved.get("daily_swipe_limit");

        sqlx::query(
            r#"
            INSERT INTO swipes (swiper_id, target_id, action, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(swiper_id, target_id) DO UPDATE SET
                action = excluded.action,
                created_at = excluded.created_at
            "#,
        )
        .bind(actor)
        .bind(target)
        .bind(action.as_str())
        .bind(encode_time(&now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::record_swipe(action.as_str());

        let (is_match, match_id) = match action {
            SwipeAction::Like => {
                let result = self.formation.try_form_match(actor, target).await?;
                (result.formed, result.match_id)
            }
            SwipeAction::Dislike => {
                self.formation.dissolve(actor, target).await?;
                (false, None)
            }
        };

        tracing::debug!(
            "User {} swiped {} on {} ({}/{} today, match: {})",
            actor,
            action.as_str(),
            target,
            used,
            limit,
            is_match
        );

        Ok(SwipeOutcome {
            is_match,
            match_id,
            swipes_remaining: (limit - used).max(0),
        })
    }

    /// Ids `user` has already decided on, with the recorded action
    pub async fn decisions_by(&self, user: i64) -> AppResult<Vec<(i64, SwipeAction)>> {
        let rows = sqlx::query(
            "SELECT target_id, action FROM swipes WHERE swiper_id = ?1 ORDER BY id ASC",
        )
        .bind(user)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|r| {
                let action: String = r.get("action");
                Ok((r.get("target_id"), SwipeAction::from_str(&action)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PremiumTier;
    use crate::db::{create_file_pool, create_memory_pool};
    use crate::profile::ProfileDirectory;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        ledger: SwipeLedger,
        accounts: AccountDirectory,
        pool: SqlitePool,
        users: Vec<i64>,
    }

    async fn fixture(n: usize) -> Fixture {
        fixture_on(create_memory_pool().await.unwrap(), n).await
    }

    async fn fixture_on(pool: SqlitePool, n: usize) -> Fixture {
        let accounts = AccountDirectory::new(pool.clone());
        let profiles = ProfileDirectory::new(pool.clone());
        let formation = MatchFormation::new(pool.clone(), accounts.clone(), profiles);
        let ledger = SwipeLedger::new(pool.clone(), accounts.clone(), formation);

        let mut users = Vec::new();
        for i in 0..n {
            let user = accounts
                .create_user(&format!("u{}@example.com", i), PremiumTier::Free)
                .await
                .unwrap();
            users.push(user.id);
        }

        Fixture {
            ledger,
            accounts,
            pool,
            users,
        }
    }

    #[tokio::test]
    async fn test_mutual_like_forms_match_on_second_swipe() {
        let f = fixture(2).await;
        let (a, b) = (f.users[0], f.users[1]);

        let first = f.ledger.record_swipe(a, b, SwipeAction::Like).await.unwrap();
        assert!(!first.is_match);

        let second = f.ledger.record_swipe(b, a, SwipeAction::Like).await.unwrap();
        assert!(second.is_match);
        assert!(second.match_id.is_some());
    }

    #[tokio::test]
    async fn test_self_swipe_rejected_without_consuming_quota() {
        let f = fixture(1).await;
        let a = f.users[0];

        let err = f.ledger.record_swipe(a, a, SwipeAction::Like).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTarget(_)));
        assert_eq!(f.accounts.get_user(a).await.unwrap().swipes_today, 0);
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_found() {
        let f = fixture(1).await;
        let err = f
            .ledger
            .record_swipe(f.users[0], 4242, SwipeAction::Like)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_quota_enforced_and_reset_next_day() {
        let f = fixture(10).await;
        let actor = f.users[0];
        let day = Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap();

        for target in &f.users[1..9] {
            f.ledger
                .record_swipe_at(actor, *target, SwipeAction::Dislike, day)
                .await
                .unwrap();
        }

        let err = f
            .ledger
            .record_swipe_at(actor, f.users[9], SwipeAction::Like, day)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { limit: 8 }));
        assert_eq!(f.accounts.get_user(actor).await.unwrap().swipes_today, 8);

        let next_day = day + Duration::days(1);
        let outcome = f
            .ledger
            .record_swipe_at(actor, f.users[9], SwipeAction::Like, next_day)
            .await
            .unwrap();
        assert_eq!(outcome.swipes_remaining, 7);

        let user = f.accounts.get_user(actor).await.unwrap();
        assert_eq!(user.swipes_today, 1);
        assert_eq!(user.last_swipe_date, next_day.date_naive());
    }

    #[tokio::test]
    async fn test_repeat_decision_overwrites_but_consumes_quota() {
        let f = fixture(2).await;
        let (a, b) = (f.users[0], f.users[1]);

        f.ledger.record_swipe(a, b, SwipeAction::Dislike).await.unwrap();
        f.ledger.record_swipe(a, b, SwipeAction::Like).await.unwrap();

        assert_eq!(f.ledger.decisions_by(a).await.unwrap(), vec![(b, SwipeAction::Like)]);
        assert_eq!(f.accounts.get_user(a).await.unwrap().swipes_today, 2);
    }

    #[tokio::test]
    async fn test_withdrawn_like_dissolves_match() {
        let f = fixture(2).await;
        let (a, b) = (f.users[0], f.users[1]);

        f.ledger.record_swipe(a, b, SwipeAction::Like).await.unwrap();
        assert!(f.ledger.record_swipe(b, a, SwipeAction::Like).await.unwrap().is_match);

        f.ledger.record_swipe(a, b, SwipeAction::Dislike).await.unwrap();
        assert!(!f.ledger.formation.is_matched(a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_late_dissolve_after_relike_keeps_match() {
        let f = fixture(2).await;
        let (a, b) = (f.users[0], f.users[1]);

        f.ledger.record_swipe(a, b, SwipeAction::Like).await.unwrap();
        assert!(f.ledger.record_swipe(b, a, SwipeAction::Like).await.unwrap().is_match);

        // A's dislike is stored, but its dissolve has not run yet
        sqlx::query("UPDATE swipes SET action = 'dislike' WHERE swiper_id = ?1 AND target_id = ?2")
            .bind(a)
            .bind(b)
            .execute(&f.pool)
            .await
            .unwrap();

        let relike = f.ledger.record_swipe(a, b, SwipeAction::Like).await.unwrap();
        assert!(!relike.is_match);

        f.ledger.formation.dissolve(a, b).await.unwrap();

        assert_eq!(f.ledger.decisions_by(a).await.unwrap(), vec![(b, SwipeAction::Like)]);
        assert!(f.ledger.formation.is_matched(a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_blocked_pair_cannot_swipe() {
        let f = fixture(2).await;
        let (a, b) = (f.users[0], f.users[1]);
        f.accounts.block(b, a).await.unwrap();

        let err = f.ledger.record_swipe(a, b, SwipeAction::Like).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_swipes_never_exceed_limit() {
        let (_dir, pool) = create_file_pool().await.unwrap();
        let f = fixture_on(pool, 13).await;
        let actor = f.users[0];

        let mut handles = Vec::new();
        for target in f.users[1..].iter().copied() {
            let ledger = f.ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.record_swipe(actor, target, SwipeAction::Like).await
            }));
        }

        let mut ok = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AppError::QuotaExceeded { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(ok, 8);
        assert_eq!(rejected, 4);
        assert_eq!(f.accounts.get_user(actor).await.unwrap().swipes_today, 8);
    }
}
