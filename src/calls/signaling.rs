/// Call signaling service
use crate::{
    account::AccountDirectory,
    calls::{CallPoll, CallStatus, CallView},
    config::CallConfig,
    db::{decode_time, encode_time},
    error::{AppError, AppResult},
    matching::MatchFormation,
    metrics,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

const CALL_SELECT: &str = r#"
    SELECT c.id, c.caller_id, c.receiver_id, c.status, c.sdp_offer, c.sdp_answer,
           c.created_at, c.updated_at, p.first_name AS caller_name
    FROM calls c
    LEFT JOIN profiles p ON p.user_id = c.caller_id
"#;

/// Call signaling service
#[derive(Clone)]
pub struct CallSignaling {
    db: SqlitePool,
    accounts: AccountDirectory,
    formation: MatchFormation,
    ring_window: Duration,
    status_window: Duration,
}

impl CallSignaling {
    pub fn new(
        db: SqlitePool,
        accounts: AccountDirectory,
        formation: MatchFormation,
        config: &CallConfig,
    ) -> Self {
        Self {
            db,
            accounts,
            formation,
            ring_window: Duration::seconds(config.ring_window_secs),
            status_window: Duration::seconds(config.status_window_secs),
        }
    }

    /// Place a call, superseding any call the caller still has ringing
    pub async fn start(&self, caller: i64, receiver: i64, offer: Option<&str>) -> AppResult<CallView> {
        self.start_at(caller, receiver, offer, Utc::now()).await
    }

    pub async fn start_at(
        &self,
        caller: i64,
        receiver: i64,
        offer: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<CallView> {
        if caller == receiver {
            return Err(AppError::InvalidTarget("Cannot call yourself".to_string()));
        }

        self.accounts.get_user(receiver).await?;

        if self.accounts.is_blocked_between(caller, receiver).await? {
            return Err(AppError::Forbidden("You cannot call this user.".to_string()));
        }

        if !self.formation.is_matched(caller, receiver).await? {
            return Err(AppError::Forbidden("You must match before calling".to_string()));
        }

        let stamp = encode_time(&now);
        let mut tx = self.db.begin().await?;

        let superseded = sqlx::query(
            "UPDATE calls SET status = 'ended', updated_at = ?1 WHERE caller_id = ?2 AND status = 'initiated'",
        )
        .bind(&stamp)
        .bind(caller)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO calls (caller_id, receiver_id, status, sdp_offer, created_at, updated_at)
            VALUES (?1, ?2, 'initiated', ?3, ?4, ?4)
            "#,
        )
        .bind(caller)
        .bind(receiver)
        .bind(offer)
        .bind(&stamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        for _ in 0..superseded.rows_affected() {
            metrics::record_call_transition(CallStatus::Ended.as_str());
        }
        metrics::record_call_transition(CallStatus::Initiated.as_str());

        let id = result.last_insert_rowid();
        tracing::info!(
            "Call {} started from {} to {} ({} superseded)",
            id,
            caller,
            receiver,
            superseded.rows_affected()
        );

        self.get_call(id).await
    }

    /// Accept a ringing call
    pub async fn answer(&self, call_id: i64, answer: Option<&str>, by: i64) -> AppResult<CallView> {
        let call = self.get_call(call_id).await?;
        if call.receiver != by {
            return Err(AppError::Forbidden("Not your call".to_string()));
        }

        let updated = sqlx::query(
            r#"
            UPDATE calls SET status = 'active', sdp_answer = ?1, updated_at = ?2
            WHERE id = ?3 AND status = 'initiated'
            "#,
        )
        .bind(answer)
        .bind(encode_time(&Utc::now()))
        .bind(call_id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get_call(call_id).await?;
            return Err(AppError::InvalidState(format!(
                "Call {} is {}",
                call_id,
                current.status.as_str()
            )));
        }

        metrics::record_call_transition(CallStatus::Active.as_str());
        tracing::info!("Call {} answered by {}", call_id, by);
        self.get_call(call_id).await
    }

    /// Decline a ringing call
    pub async fn reject(&self, call_id: i64, by: i64) -> AppResult<CallView> {
        let call = self.get_call(call_id).await?;
        if call.receiver != by {
            return Err(AppError::Forbidden("Not your call".to_string()));
        }

        let updated = sqlx::query(
            "UPDATE calls SET status = 'rejected', updated_at = ?1 WHERE id = ?2 AND status = 'initiated'",
        )
        .bind(encode_time(&Utc::now()))
        .bind(call_id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            let current = self.get_call(call_id).await?;
            return Err(AppError::InvalidState(format!(
                "Call {} is {}",
                call_id,
                current.status.as_str()
            )));
        }

        metrics::record_call_transition(CallStatus::Rejected.as_str());
        tracing::info!("Call {} rejected by {}", call_id, by);
        self.get_call(call_id).await
    }

    /// Hang up. Ending a call that is already over changes nothing.
    pub async fn end(&self, call_id: i64, by: i64) -> AppResult<CallView> {
        let call = self.get_call(call_id).await?;
        if call.caller != by && call.receiver != by {
            return Err(AppError::Forbidden("Not your call".to_string()));
        }

        let updated = sqlx::query(
            r#"
            UPDATE calls SET status = 'ended', updated_at = ?1
            WHERE id = ?2 AND status IN ('initiated', 'active')
            "#,
        )
        .bind(encode_time(&Utc::now()))
        .bind(call_id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(call);
        }

        metrics::record_call_transition(CallStatus::Ended.as_str());
        tracing::info!("Call {} ended by {}", call_id, by);
        self.get_call(call_id).await
    }

    /// Calls `user` should react to right now
    pub async fn poll(&self, user: i64) -> AppResult<CallPoll> {
        self.poll_at(user, Utc::now()).await
    }

    pub async fn poll_at(&self, user: i64, now: DateTime<Utc>) -> AppResult<CallPoll> {
        let ring_since = encode_time(&(now - self.ring_window));
        let status_since = encode_time(&(now - self.status_window));

        let incoming = self
            .first_call(
                r#"WHERE c.receiver_id = ?1 AND c.status = 'initiated' AND c.created_at >= ?2
                   ORDER BY c.created_at DESC, c.id DESC LIMIT 1"#,
                user,
                &ring_since,
            )
            .await?;

        let my_call = self
            .first_call(
                r#"WHERE c.caller_id = ?1 AND c.updated_at >= ?2
                   ORDER BY c.updated_at DESC, c.id DESC LIMIT 1"#,
                user,
                &status_since,
            )
            .await?;

        let incoming_update = self
            .first_call(
                r#"WHERE c.receiver_id = ?1 AND c.status IN ('ended', 'rejected') AND c.updated_at >= ?2
                   ORDER BY c.updated_at DESC, c.id DESC LIMIT 1"#,
                user,
                &status_since,
            )
            .await?;

        Ok(CallPoll {
            incoming,
            my_call,
            incoming_update,
        })
    }

    /// End calls that rang past the ring window without an answer
    pub async fn expire_unanswered(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE calls SET status = 'ended', updated_at = ?1 WHERE status = 'initiated' AND created_at < ?2",
        )
        .bind(encode_time(&now))
        .bind(encode_time(&(now - self.ring_window)))
        .execute(&self.db)
        .await?;

        for _ in 0..result.rows_affected() {
            metrics::record_call_transition(CallStatus::Ended.as_str());
        }

        Ok(result.rows_affected())
    }

    /// Fetch a call by id
    pub async fn get_call(&self, call_id: i64) -> AppResult<CallView> {
        let row = sqlx::query(&format!("{} WHERE c.id = ?1", CALL_SELECT))
            .bind(call_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Call {} not found", call_id)))?;

        parse_call(&row)
    }

    async fn first_call(&self, filter: &str, user: i64, since: &str) -> AppResult<Option<CallView>> {
        let row = sqlx::query(&format!("{} {}", CALL_SELECT, filter))
            .bind(user)
            .bind(since)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(parse_call).transpose()
    }
}

fn parse_call(row: &SqliteRow) -> AppResult<CallView> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let caller_name: Option<String> = row.get("caller_name");

    Ok(CallView {
        id: row.get("id"),
        caller: row.get("caller_id"),
        receiver: row.get("receiver_id"),
        caller_name: caller_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "User".to_string()),
        status: CallStatus::from_str(&status)?,
        sdp_offer: row.get("sdp_offer"),
        sdp_answer: row.get("sdp_answer"),
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PremiumTier;
    use crate::db::create_memory_pool;
    use crate::matching::{SwipeAction, SwipeLedger};
    use crate::profile::{ProfileDirectory, ProfileInput};

    struct Fixture {
        calls: CallSignaling,
        accounts: AccountDirectory,
        /// a is matched with both b and c; d is matched with no one
        a: i64,
        b: i64,
        c: i64,
        d: i64,
    }

    async fn fixture() -> Fixture {
        let pool = create_memory_pool().await.unwrap();
        let accounts = AccountDirectory::new(pool.clone());
        let profiles = ProfileDirectory::new(pool.clone());
        let formation = MatchFormation::new(pool.clone(), accounts.clone(), profiles.clone());
        let ledger = SwipeLedger::new(pool.clone(), accounts.clone(), formation.clone());

        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let id = accounts
                .create_user(&format!("{}@example.com", name), PremiumTier::Free)
                .await
                .unwrap()
                .id;
            ids.push(id);
        }
        let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);

        profiles
            .upsert_profile(
                a,
                &ProfileInput {
                    first_name: "Arjun".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        for other in [b, c] {
            ledger.record_swipe(a, other, SwipeAction::Like).await.unwrap();
            ledger.record_swipe(other, a, SwipeAction::Like).await.unwrap();
        }

        Fixture {
            calls: CallSignaling::new(pool, accounts.clone(), formation, &CallConfig::default()),
            accounts,
            a,
            b,
            c,
            d,
        }
    }

    #[tokio::test]
    async fn test_start_answer_end() {
        let f = fixture().await;

        let call = f.calls.start(f.a, f.b, Some("offer-sdp")).await.unwrap();
        assert_eq!(call.status, CallStatus::Initiated);
        assert_eq!(call.caller_name, "Arjun");

        let err = f.calls.answer(call.id, Some("answer-sdp"), f.a).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let active = f.calls.answer(call.id, Some("answer-sdp"), f.b).await.unwrap();
        assert_eq!(active.status, CallStatus::Active);
        assert_eq!(active.sdp_answer.as_deref(), Some("answer-sdp"));

        let err = f.calls.answer(call.id, Some("again"), f.b).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        assert!(matches!(
            f.calls.end(call.id, f.d).await,
            Err(AppError::Forbidden(_))
        ));

        let ended = f.calls.end(call.id, f.b).await.unwrap();
        assert_eq!(ended.status, CallStatus::Ended);

        // Ending twice is a no-op
        let again = f.calls.end(call.id, f.a).await.unwrap();
        assert_eq!(again.status, CallStatus::Ended);
        assert_eq!(again.updated_at, ended.updated_at);
    }

    #[tokio::test]
    async fn test_new_call_supersedes_pending_one() {
        let f = fixture().await;

        let first = f.calls.start(f.a, f.b, Some("o1")).await.unwrap();
        let second = f.calls.start(f.a, f.c, Some("o2")).await.unwrap();

        assert_eq!(f.calls.get_call(first.id).await.unwrap().status, CallStatus::Ended);
        assert_eq!(second.status, CallStatus::Initiated);

        let err = f.calls.answer(first.id, None, f.b).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_reject_is_terminal() {
        let f = fixture().await;
        let call = f.calls.start(f.a, f.b, None).await.unwrap();

        let rejected = f.calls.reject(call.id, f.b).await.unwrap();
        assert_eq!(rejected.status, CallStatus::Rejected);

        assert!(matches!(
            f.calls.answer(call.id, None, f.b).await,
            Err(AppError::InvalidState(_))
        ));
        // end leaves a rejected call alone
        assert_eq!(f.calls.end(call.id, f.a).await.unwrap().status, CallStatus::Rejected);
    }

    #[tokio::test]
    async fn test_start_requires_match() {
        let f = fixture().await;

        assert!(matches!(
            f.calls.start(f.a, f.d, None).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.calls.start(f.a, f.a, None).await,
            Err(AppError::InvalidTarget(_))
        ));
        assert!(matches!(
            f.calls.answer(404, None, f.a).await,
            Err(AppError::NotFound(_))
        ));

        f.accounts.block(f.b, f.a).await.unwrap();
        assert!(matches!(
            f.calls.start(f.a, f.b, None).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_poll_windows() {
        let f = fixture().await;
        let t0 = Utc::now();

        let call = f.calls.start_at(f.a, f.b, Some("offer"), t0).await.unwrap();

        let poll = f.calls.poll_at(f.b, t0 + Duration::seconds(30)).await.unwrap();
        assert_eq!(poll.incoming.map(|c| c.id), Some(call.id));
        assert!(poll.incoming_update.is_none());

        let caller_view = f.calls.poll_at(f.a, t0 + Duration::seconds(5)).await.unwrap();
        assert_eq!(caller_view.my_call.map(|c| c.id), Some(call.id));

        let late = f.calls.poll_at(f.b, t0 + Duration::seconds(46)).await.unwrap();
        assert!(late.incoming.is_none());

        let quiet = f.calls.poll_at(f.a, t0 + Duration::seconds(11)).await.unwrap();
        assert!(quiet.my_call.is_none());
    }

    #[tokio::test]
    async fn test_poll_reports_rejection_to_both_sides() {
        let f = fixture().await;
        let call = f.calls.start(f.a, f.b, None).await.unwrap();
        f.calls.reject(call.id, f.b).await.unwrap();

        let receiver = f.calls.poll(f.b).await.unwrap();
        assert!(receiver.incoming.is_none());
        assert_eq!(
            receiver.incoming_update.map(|c| c.status),
            Some(CallStatus::Rejected)
        );

        let caller = f.calls.poll(f.a).await.unwrap();
        assert_eq!(caller.my_call.map(|c| c.status), Some(CallStatus::Rejected));
    }

    #[tokio::test]
    async fn test_expire_unanswered() {
        let f = fixture().await;
        let t0 = Utc::now() - Duration::seconds(120);
        let stale = f.calls.start_at(f.a, f.b, None, t0).await.unwrap();
        let fresh = f.calls.start(f.c, f.a, None).await.unwrap();

        assert_eq!(f.calls.expire_unanswered(Utc::now()).await.unwrap(), 1);
        assert_eq!(f.calls.get_call(stale.id).await.unwrap().status, CallStatus::Ended);
        assert_eq!(f.calls.get_call(fresh.id).await.unwrap().status, CallStatus::Initiated);
    }
}
