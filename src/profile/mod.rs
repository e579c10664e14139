/// Profile directory
///
/// Read side of profile management. Discovery scoring and the match and
/// chat summaries only need a handful of attributes; editing flows live in the
/// profile service, which feeds rows in through `upsert_profile`.

use crate::{
    db::{decode_date, encode_date, encode_time},
    error::{AppError, AppResult},
};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// District assigned when a profile does not declare one
pub const DEFAULT_DISTRICT: &str = "ernakulam";

/// Declared gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            _ => Err(AppError::Validation(format!("Invalid gender: {}", s))),
        }
    }
}

/// Who the user wants to be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderPreference {
    Male,
    Female,
    All,
}

impl GenderPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenderPreference::Male => "male",
            GenderPreference::Female => "female",
            GenderPreference::All => "all",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s {
            "male" => Ok(GenderPreference::Male),
            "female" => Ok(GenderPreference::Female),
            "all" => Ok(GenderPreference::All),
            _ => Err(AppError::Validation(format!("Invalid preference: {}", s))),
        }
    }

    /// Hard filter applied by discovery. A candidate without a declared
    /// gender only passes an `All` preference.
    pub fn accepts(&self, gender: Option<Gender>) -> bool {
        match self {
            GenderPreference::All => true,
            GenderPreference::Male => gender == Some(Gender::Male),
            GenderPreference::Female => gender == Some(Gender::Female),
        }
    }
}

/// Profile attributes consumed by the matching engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i64,
    pub first_name: String,
    pub dob: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub interested_in: Option<GenderPreference>,
    pub district: String,
    pub bio: String,
    pub relationship_intents: Vec<String>,
    pub interest_ids: Vec<i64>,
    /// Photo URLs, primary first
    pub photos: Vec<String>,
}

impl Profile {
    /// Age in whole years on `today`
    pub fn age_on(&self, today: NaiveDate) -> Option<i32> {
        self.dob.map(|dob| {
            let mut age = today.year() - dob.year();
            if (today.month(), today.day()) < (dob.month(), dob.day()) {
                age -= 1;
            }
            age
        })
    }
}

/// Profile write payload (fed by profile management)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileInput {
    pub first_name: String,
    pub dob: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub interested_in: Option<GenderPreference>,
    pub district: Option<String>,
    pub bio: String,
    pub relationship_intents: Vec<String>,
}

const PROFILE_COLUMNS: &str = "p.user_id, p.first_name, p.dob, p.gender, p.interested_in, \
                               p.district, p.bio, p.relationship_intents";

/// Profile directory service
#[derive(Clone)]
pub struct ProfileDirectory {
    db: SqlitePool,
}

impl ProfileDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert or replace a user's profile attributes
    pub async fn upsert_profile(&self, user_id: i64, input: &ProfileInput) -> AppResult<()> {
        let intents = serde_json::to_string(&input.relationship_intents)
            .map_err(|e| AppError::Internal(format!("Failed to encode intents: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, first_name, dob, gender, interested_in, district, bio,
                                  relationship_intents)
            VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, ?9), ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                first_name = excluded.first_name,
                dob = excluded.dob,
                gender = excluded.gender,
                interested_in = excluded.interested_in,
                district = excluded.district,
                bio = excluded.bio,
                relationship_intents = excluded.relationship_intents
            "#,
        )
        .bind(user_id)
        .bind(&input.first_name)
        .bind(input.dob.as_ref().map(encode_date))
        .bind(input.gender.map(|g| g.as_str()))
        .bind(input.interested_in.map(|p| p.as_str()))
        .bind(&input.district)
        .bind(&input.bio)
        .bind(intents)
        .bind(DEFAULT_DISTRICT)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Replace a user's interest tags, creating unknown tags on the fly.
    pub async fn set_interests(&self, user_id: i64, names: &[&str]) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM profile_interests WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for name in names {
            sqlx::query("INSERT INTO interests (name) VALUES (?1) ON CONFLICT(name) DO NOTHING")
                .bind(*name)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO profile_interests (user_id, interest_id)
                SELECT ?1, id FROM interests WHERE name = ?2
                ON CONFLICT(user_id, interest_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(*name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Attach a photo reference (media storage is external)
    pub async fn add_photo(&self, user_id: i64, url: &str, is_primary: bool) -> AppResult<i64> {
        let result = sqlx::query(
            "INSERT INTO user_photos (user_id, url, is_primary, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(url)
        .bind(is_primary)
        .bind(encode_time(&Utc::now()))
        .execute(&self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Fetch one profile, if the user has created one
    pub async fn get_profile(&self, user_id: i64) -> AppResult<Option<Profile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM profiles p WHERE p.user_id = ?1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut profile = parse_profile(&row)?;
        profile.interest_ids = self.interest_ids_for(user_id).await?;
        profile.photos = self.photos_for(user_id).await?;
        Ok(Some(profile))
    }

    /// Profiles of every active user except `viewer`, in user-id order.
    ///
    /// Users without a profile row are not returned.
    pub async fn active_profiles_except(&self, viewer: i64) -> AppResult<Vec<Profile>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM profiles p
            JOIN users u ON u.id = p.user_id
            WHERE u.status = 'active' AND u.id != ?1
            ORDER BY u.id ASC
            "#,
            PROFILE_COLUMNS
        ))
        .bind(viewer)
        .fetch_all(&self.db)
        .await?;

        let mut interests: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in sqlx::query(
            "SELECT user_id, interest_id FROM profile_interests ORDER BY user_id, interest_id",
        )
        .fetch_all(&self.db)
        .await?
        {
            interests
                .entry(row.get("user_id"))
                .or_default()
                .push(row.get("interest_id"));
        }

        let mut photos: HashMap<i64, Vec<String>> = HashMap::new();
        for row in sqlx::query(
            "SELECT user_id, url FROM user_photos ORDER BY user_id, is_primary DESC, id ASC",
        )
        .fetch_all(&self.db)
        .await?
        {
            photos.entry(row.get("user_id")).or_default().push(row.get("url"));
        }

        rows.iter()
            .map(|row| {
                let mut profile = parse_profile(row)?;
                profile.interest_ids = interests.remove(&profile.user_id).unwrap_or_default();
                profile.photos = photos.remove(&profile.user_id).unwrap_or_default();
                Ok(profile)
            })
            .collect()
    }

    /// First name and primary photo, used by match and chat summaries
    pub async fn summary(&self, user_id: i64) -> AppResult<(String, Option<String>)> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT first_name FROM profiles WHERE user_id = ?1) AS first_name,
                (SELECT url FROM user_photos WHERE user_id = ?1
                 ORDER BY is_primary DESC, id ASC LIMIT 1) AS photo
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        let name: Option<String> = row.get("first_name");
        let name = match name {
            Some(n) if !n.is_empty() => n,
            _ => "User".to_string(),
        };

        Ok((name, row.get("photo")))
    }

    async fn interest_ids_for(&self, user_id: i64) -> AppResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT interest_id FROM profile_interests WHERE user_id = ?1 ORDER BY interest_id",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(|r| r.get("interest_id")).collect())
    }

    async fn photos_for(&self, user_id: i64) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT url FROM user_photos WHERE user_id = ?1 ORDER BY is_primary DESC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(|r| r.get("url")).collect())
    }
}

fn parse_profile(row: &sqlx::sqlite::SqliteRow) -> AppResult<Profile> {
    let dob: Option<String> = row.get("dob");
    let gender: Option<String> = row.get("gender");
    let interested_in: Option<String> = row.get("interested_in");
    let intents: String = row.get("relationship_intents");
    let relationship_intents = serde_json::from_str(&intents)
        .map_err(|e| AppError::Internal(format!("Invalid relationship intents {}: {}", intents, e)))?;

    Ok(Profile {
        user_id: row.get("user_id"),
        first_name: row.get("first_name"),
        dob: dob.as_deref().map(decode_date).transpose()?,
        gender: gender.as_deref().map(Gender::from_str).transpose()?,
        interested_in: interested_in
            .as_deref()
            .map(GenderPreference::from_str)
            .transpose()?,
        district: row.get("district"),
        bio: row.get("bio"),
        relationship_intents,
        interest_ids: Vec::new(),
        photos: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountDirectory, PremiumTier, UserStatus};
    use crate::db::create_memory_pool;

    #[test]
    fn test_age_respects_birthday() {
        let profile = Profile {
            user_id: 1,
            first_name: "Meera".into(),
            dob: NaiveDate::from_ymd_opt(2000, 6, 15),
            gender: Some(Gender::Female),
            interested_in: Some(GenderPreference::Male),
            district: "kochi".into(),
            bio: String::new(),
            relationship_intents: vec![],
            interest_ids: vec![],
            photos: vec![],
        };

        assert_eq!(profile.age_on(NaiveDate::from_ymd_opt(2026, 6, 14).unwrap()), Some(25));
        assert_eq!(profile.age_on(NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()), Some(26));
    }

    #[test]
    fn test_preference_filter() {
        assert!(GenderPreference::All.accepts(None));
        assert!(GenderPreference::Male.accepts(Some(Gender::Male)));
        assert!(!GenderPreference::Male.accepts(Some(Gender::Other)));
        assert!(!GenderPreference::Female.accepts(None));
    }

    #[tokio::test]
    async fn test_active_profiles_skip_inactive_and_profileless() {
        let pool = create_memory_pool().await.unwrap();
        let accounts = AccountDirectory::new(pool.clone());
        let profiles = ProfileDirectory::new(pool);

        let viewer = accounts.create_user("v@example.com", PremiumTier::Free).await.unwrap();
        let a = accounts.create_user("a@example.com", PremiumTier::Free).await.unwrap();
        let banned = accounts.create_user("b@example.com", PremiumTier::Free).await.unwrap();
        let no_profile = accounts.create_user("c@example.com", PremiumTier::Free).await.unwrap();

        for user in [viewer.id, a.id, banned.id] {
            profiles
                .upsert_profile(
                    user,
                    &ProfileInput {
                        first_name: format!("user{}", user),
                        relationship_intents: vec!["marriage".into()],
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        accounts.set_status(banned.id, UserStatus::PermBanned).await.unwrap();

        profiles.set_interests(a.id, &["music", "trekking"]).await.unwrap();
        profiles.add_photo(a.id, "/media/a2.jpg", false).await.unwrap();
        profiles.add_photo(a.id, "/media/a1.jpg", true).await.unwrap();

        let found = profiles.active_profiles_except(viewer.id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, a.id);
        assert_eq!(found[0].interest_ids.len(), 2);
        assert_eq!(found[0].photos, vec!["/media/a1.jpg", "/media/a2.jpg"]);
        assert_eq!(found[0].relationship_intents, vec!["marriage"]);
        assert_eq!(found[0].district, "ernakulam");

        let (name, photo) = profiles.summary(a.id).await.unwrap();
        assert_eq!(name, format!("user{}", a.id));
        assert_eq!(photo.as_deref(), Some("/media/a1.jpg"));

        let (name, photo) = profiles.summary(no_profile.id).await.unwrap();
        assert_eq!(name, "User");
        assert!(photo.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_intents_are_an_error() {
        let pool = create_memory_pool().await.unwrap();
        let accounts = AccountDirectory::new(pool.clone());
        let profiles = ProfileDirectory::new(pool.clone());
        let user = accounts.create_user("x@example.com", PremiumTier::Free).await.unwrap();
        profiles
            .upsert_profile(
                user.id,
                &ProfileInput {
                    first_name: "Anu".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        sqlx::query("UPDATE profiles SET relationship_intents = 'not json' WHERE user_id = ?1")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();

        let err = profiles.get_profile(user.id).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
