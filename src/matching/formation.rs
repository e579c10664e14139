/// Match formation
use crate::{
    account::AccountDirectory,
    chat::MessageType,
    db::encode_time,
    error::AppResult,
    matching::{pair_key, MatchSummary},
    metrics,
    profile::ProfileDirectory,
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

/// Outcome of a formation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormationResult {
    /// A match row was created or reactivated by this call
    pub formed: bool,
    pub match_id: Option<i64>,
}

/// Match formation service
#[derive(Clone)]
pub struct MatchFormation {
    db: SqlitePool,
    accounts: AccountDirectory,
    profiles: ProfileDirectory,
}

impl MatchFormation {
    pub fn new(db: SqlitePool, accounts: AccountDirectory, profiles: ProfileDirectory) -> Self {
        Self {
            db,
            accounts,
            profiles,
        }
    }

    /// Create the match for `a` and `b` if both directions are likes.
    ///
    /// The reverse-like check and the insert are one statement against the
    /// unique pair key, so when both users like each other concurrently only
    /// one caller observes `formed == true`.
    pub async fn try_form_match(&self, a: i64, b: i64) -> AppResult<FormationResult> {
        let (low, high) = pair_key(a, b);

        let row = sqlx::query(
            r#"
            INSERT INTO matches (user_low, user_high, created_at, is_active)
            SELECT ?1, ?2, ?3, 1
            WHERE EXISTS (SELECT 1 FROM swipes WHERE swiper_id = ?1 AND target_id = ?2 AND action = 'like')
              AND EXISTS (SELECT 1 FROM swipes WHERE swiper_id = ?2 AND target_id = ?1 AND action = 'like')
            ON CONFLICT(user_low, user_high) DO UPDATE SET
                is_active = 1,
                created_at = excluded.created_at
            WHERE matches.is_active = 0
            RETURNING id
            "#,
        )
        .bind(low)
        .bind(high)
        .bind(encode_time(&Utc::now()))
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = row {
            let match_id: i64 = row.get("id");
            tracing::info!("Match {} formed between {} and {}", match_id, low, high);
            metrics::record_match_formed();
            return Ok(FormationResult {
                formed: true,
                match_id: Some(match_id),
            });
        }

        // Either no mutual like yet, or another caller already formed it
        Ok(FormationResult {
            formed: false,
            match_id: self.active_match_id(a, b).await?,
        })
    }

    /// Deactivate the pair's match after one side withdrew their like.
    ///
    /// The mutual-like check is part of the update, so a dissolve that lands
    /// after the like was restored leaves the match in place.
    pub async fn dissolve(&self, a: i64, b: i64) -> AppResult<bool> {
        let (low, high) = pair_key(a, b);

        let result = sqlx::query(
            r#"
            UPDATE matches SET is_active = 0
            WHERE user_low = ?1 AND user_high = ?2 AND is_active = 1
              AND NOT (
                  EXISTS (SELECT 1 FROM swipes WHERE swiper_id = ?1 AND target_id = ?2 AND action = 'like')
                  AND EXISTS (SELECT 1 FROM swipes WHERE swiper_id = ?2 AND target_id = ?1 AND action = 'like')
              )
            "#,
        )
        .bind(low)
        .bind(high)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!("Match between {} and {} dissolved", low, high);
        }

        Ok(result.rows_affected() > 0)
    }

    /// Id of the pair's active match, if any
    pub async fn active_match_id(&self, a: i64, b: i64) -> AppResult<Option<i64>> {
        let (low, high) = pair_key(a, b);

        let row = sqlx::query(
            "SELECT id FROM matches WHERE user_low = ?1 AND user_high = ?2 AND is_active = 1",
        )
        .bind(low)
        .bind(high)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    /// True if the pair has an active match
    pub async fn is_matched(&self, a: i64, b: i64) -> AppResult<bool> {
        Ok(self.active_match_id(a, b).await?.is_some())
    }

    /// Users with an active match with `user`
    pub async fn matched_ids(&self, user: i64) -> AppResult<HashSet<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT CASE WHEN user_low = ?1 THEN user_high ELSE user_low END AS other
            FROM matches
            WHERE (user_low = ?1 OR user_high = ?1) AND is_active = 1
            "#,
        )
        .bind(user)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("other")).collect())
    }

    /// Active matches of `user`, newest first, hiding blocked partners
    pub async fn list_matches(&self, user: i64) -> AppResult<Vec<MatchSummary>> {
        let blocked = self.accounts.blocked_ids(user).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, CASE WHEN user_low = ?1 THEN user_high ELSE user_low END AS other
            FROM matches
            WHERE (user_low = ?1 OR user_high = ?1) AND is_active = 1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user)
        .fetch_all(&self.db)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let other: i64 = row.get("other");
            if blocked.contains(&other) {
                continue;
            }

            let (name, photo) = self.profiles.summary(other).await?;
            let last_message_preview = self.last_message_preview(user, other).await?;

            summaries.push(MatchSummary {
                match_id: row.get("id"),
                user_id: other,
                name,
                photo,
                last_message_preview,
            });
        }

        Ok(summaries)
    }

    async fn last_message_preview(&self, a: i64, b: i64) -> AppResult<String> {
        let row = sqlx::query(
            r#"
            SELECT message_type, content
            FROM chat_messages
            WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.db)
        .await?;

        Ok(match row {
            Some(row) => {
                let kind: String = row.get("message_type");
                let content: Option<String> = row.get("content");
                MessageType::from_str(&kind)?.preview(content.as_deref())
            }
            None => "No messages yet".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PremiumTier;
    use crate::db::{create_file_pool, create_memory_pool};

    async fn setup() -> (MatchFormation, SqlitePool, i64, i64) {
        setup_on(create_memory_pool().await.unwrap()).await
    }

    async fn setup_on(pool: SqlitePool) -> (MatchFormation, SqlitePool, i64, i64) {
        let accounts = AccountDirectory::new(pool.clone());
        let profiles = ProfileDirectory::new(pool.clone());
        let a = accounts.create_user("a@example.com", PremiumTier::Free).await.unwrap();
        let b = accounts.create_user("b@example.com", PremiumTier::Free).await.unwrap();
        (MatchFormation::new(pool.clone(), accounts, profiles), pool, a.id, b.id)
    }

    async fn like(pool: &SqlitePool, from: i64, to: i64) {
        sqlx::query(
            "INSERT INTO swipes (swiper_id, target_id, action, created_at) VALUES (?1, ?2, 'like', ?3)",
        )
        .bind(from)
        .bind(to)
        .bind(encode_time(&Utc::now()))
        .execute(pool)
        .await
        .unwrap();
    }

    async fn like_again(pool: &SqlitePool, from: i64, to: i64) {
        sqlx::query("UPDATE swipes SET action = 'like' WHERE swiper_id = ?1 AND target_id = ?2")
            .bind(from)
            .bind(to)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn withdraw(pool: &SqlitePool, from: i64, to: i64) {
        sqlx::query("UPDATE swipes SET action = 'dislike' WHERE swiper_id = ?1 AND target_id = ?2")
            .bind(from)
            .bind(to)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_match_without_reverse_like() {
        let (formation, pool, a, b) = setup().await;
        like(&pool, a, b).await;

        let result = formation.try_form_match(a, b).await.unwrap();
        assert!(!result.formed);
        assert!(result.match_id.is_none());
        assert!(!formation.is_matched(a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_attempt_is_idempotent() {
        let (formation, pool, a, b) = setup().await;
        like(&pool, a, b).await;
        like(&pool, b, a).await;

        let first = formation.try_form_match(b, a).await.unwrap();
        let second = formation.try_form_match(a, b).await.unwrap();
        assert!(first.formed);
        assert!(!second.formed);
        assert_eq!(first.match_id, second.match_id);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attempts_form_one_match() {
        let (_dir, pool) = create_file_pool().await.unwrap();
        let (formation, pool, a, b) = setup_on(pool).await;
        like(&pool, a, b).await;
        like(&pool, b, a).await;

        let f1 = formation.clone();
        let f2 = formation.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { f1.try_form_match(a, b).await.unwrap() }),
            tokio::spawn(async move { f2.try_form_match(b, a).await.unwrap() }),
        );
        let (r1, r2) = (r1.unwrap(), r2.unwrap());

        assert!(r1.formed ^ r2.formed);
        assert_eq!(formation.matched_ids(a).await.unwrap(), HashSet::from([b]));
        assert_eq!(formation.matched_ids(b).await.unwrap(), HashSet::from([a]));
    }

    #[tokio::test]
    async fn test_dissolve_and_reactivate() {
        let (formation, pool, a, b) = setup().await;
        like(&pool, a, b).await;
        like(&pool, b, a).await;

        let formed = formation.try_form_match(a, b).await.unwrap();
        withdraw(&pool, b, a).await;
        assert!(formation.dissolve(b, a).await.unwrap());
        assert!(!formation.dissolve(b, a).await.unwrap());
        assert!(!formation.is_matched(a, b).await.unwrap());

        like_again(&pool, b, a).await;
        let again = formation.try_form_match(a, b).await.unwrap();
        assert!(again.formed);
        assert_eq!(again.match_id, formed.match_id);
    }

    #[tokio::test]
    async fn test_dissolve_after_restored_like_keeps_match() {
        let (formation, pool, a, b) = setup().await;
        like(&pool, a, b).await;
        like(&pool, b, a).await;
        formation.try_form_match(a, b).await.unwrap();

        // A withdraws and then re-likes before the withdrawal's dissolve runs
        withdraw(&pool, a, b).await;
        like_again(&pool, a, b).await;
        assert!(!formation.try_form_match(a, b).await.unwrap().formed);

        assert!(!formation.dissolve(a, b).await.unwrap());
        assert!(formation.is_matched(a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_matches_hides_blocked_partner() {
        let (formation, pool, a, b) = setup().await;
        like(&pool, a, b).await;
        like(&pool, b, a).await;
        formation.try_form_match(a, b).await.unwrap();

        let listed = formation.list_matches(a).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_id, b);
        assert_eq!(listed[0].name, "User");
        assert_eq!(listed[0].last_message_preview, "No messages yet");

        formation.accounts.block(b, a).await.unwrap();
        assert!(formation.list_matches(a).await.unwrap().is_empty());
        // The match row itself survives the block
        assert!(formation.is_matched(a, b).await.unwrap());
    }
}
