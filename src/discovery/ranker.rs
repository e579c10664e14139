/// Discovery feed service
use crate::{
    account::AccountDirectory,
    discovery::{rank_candidates, DiscoveryCandidate, ViewerPreferences, ViewerRelations},
    error::AppResult,
    matching::{MatchFormation, SwipeLedger},
    profile::ProfileDirectory,
};
use chrono::{NaiveDate, Utc};
use rand::Rng;

/// Loads viewer state and ranks the feed
#[derive(Clone)]
pub struct DiscoveryRanker {
    accounts: AccountDirectory,
    profiles: ProfileDirectory,
    ledger: SwipeLedger,
    formation: MatchFormation,
}

impl DiscoveryRanker {
    pub fn new(
        accounts: AccountDirectory,
        profiles: ProfileDirectory,
        ledger: SwipeLedger,
        formation: MatchFormation,
    ) -> Self {
        Self {
            accounts,
            profiles,
            ledger,
            formation,
        }
    }

    /// Current feed for `viewer`
    pub async fn discover(&self, viewer: i64) -> AppResult<Vec<DiscoveryCandidate>> {
        let (preferences, relations, profiles) = self.load(viewer).await?;
        let feed = rank_candidates(
            &preferences,
            &relations,
            &profiles,
            Utc::now().date_naive(),
            &mut rand::thread_rng(),
        );

        tracing::debug!("Discovery for {} returned {} candidates", viewer, feed.len());
        Ok(feed)
    }

    /// Feed with an explicit day and random source
    pub async fn discover_with<R: Rng + ?Sized>(
        &self,
        viewer: i64,
        today: NaiveDate,
        rng: &mut R,
    ) -> AppResult<Vec<DiscoveryCandidate>> {
        let (preferences, relations, profiles) = self.load(viewer).await?;
        Ok(rank_candidates(&preferences, &relations, &profiles, today, rng))
    }

    async fn load(
        &self,
        viewer: i64,
    ) -> AppResult<(ViewerPreferences, ViewerRelations, Vec<crate::profile::Profile>)> {
        let own = self.profiles.get_profile(viewer).await?;
        let preferences = ViewerPreferences::for_viewer(viewer, own.as_ref());

        let relations = ViewerRelations {
            swiped: self
                .ledger
                .decisions_by(viewer)
                .await?
                .into_iter()
                .map(|(target, _)| target)
                .collect(),
            matched: self.formation.matched_ids(viewer).await?,
            blocked: self.accounts.blocked_ids(viewer).await?,
        };

        let profiles = self.profiles.active_profiles_except(viewer).await?;
        Ok((preferences, relations, profiles))
    }
}
