/// Discovery ranking
///
/// The feed is recomputed from current ledger and profile state on every
/// request. Candidates the viewer never swiped on ("new") are ranked by
/// score; candidates swiped before but never matched ("recycled") follow
/// in random order so a user can reconsider them.

mod ranker;

pub use ranker::DiscoveryRanker;

use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::profile::{GenderPreference, Profile, DEFAULT_DISTRICT};

/// Maximum feed length
pub const FEED_SIZE: usize = 10;

const INTENT_OVERLAP_SCORE: i64 = 10;
const SHARED_INTEREST_SCORE: i64 = 2;
const SAME_DISTRICT_SCORE: i64 = 5;

/// One entry of the discovery feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    pub user_id: i64,
    pub first_name: String,
    pub age: Option<i32>,
    pub district: String,
    pub bio: String,
    pub photos: Vec<String>,
    pub score: i64,
}

/// Viewer attributes that drive filtering and scoring
#[derive(Debug, Clone)]
pub struct ViewerPreferences {
    pub user_id: i64,
    pub interested_in: Option<GenderPreference>,
    pub intents: HashSet<String>,
    pub interests: HashSet<i64>,
    pub district: String,
}

impl ViewerPreferences {
    /// Preferences of a viewer; a viewer without a profile gets the defaults
    /// a freshly created profile would have
    pub fn for_viewer(user_id: i64, profile: Option<&Profile>) -> Self {
        match profile {
            Some(p) => Self {
                user_id,
                interested_in: p.interested_in,
                intents: p.relationship_intents.iter().cloned().collect(),
                interests: p.interest_ids.iter().copied().collect(),
                district: p.district.clone(),
            },
            None => Self {
                user_id,
                interested_in: None,
                intents: HashSet::new(),
                interests: HashSet::new(),
                district: DEFAULT_DISTRICT.to_string(),
            },
        }
    }

    /// Compatibility score of `candidate` for this viewer
    pub fn score(&self, candidate: &Profile) -> i64 {
        let mut score = 0;

        if candidate
            .relationship_intents
            .iter()
            .any(|intent| self.intents.contains(intent))
        {
            score += INTENT_OVERLAP_SCORE;
        }

        let shared = candidate
            .interest_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|id| self.interests.contains(*id))
            .count() as i64;
        score += shared * SHARED_INTEREST_SCORE;

        if candidate.district == self.district {
            score += SAME_DISTRICT_SCORE;
        }

        score
    }

    fn accepts(&self, candidate: &Profile) -> bool {
        match self.interested_in {
            Some(pref) => pref.accepts(candidate.gender),
            None => true,
        }
    }
}

/// Relationship state between the viewer and everyone else
#[derive(Debug, Clone, Default)]
pub struct ViewerRelations {
    pub swiped: HashSet<i64>,
    pub matched: HashSet<i64>,
    pub blocked: HashSet<i64>,
}

/// Rank `profiles` for the viewer.
///
/// `profiles` must be the profiles of active users in a stable enumeration
/// order; equal-scored new candidates keep that order.
pub fn rank_candidates<R: Rng + ?Sized>(
    viewer: &ViewerPreferences,
    relations: &ViewerRelations,
    profiles: &[Profile],
    today: NaiveDate,
    rng: &mut R,
) -> Vec<DiscoveryCandidate> {
    let mut fresh = Vec::new();
    let mut recycled = Vec::new();

    for profile in profiles {
        let id = profile.user_id;
        if id == viewer.user_id
            || relations.blocked.contains(&id)
            || relations.matched.contains(&id)
            || !viewer.accepts(profile)
        {
            continue;
        }

        let candidate = DiscoveryCandidate {
            user_id: id,
            first_name: profile.first_name.clone(),
            age: profile.age_on(today),
            district: profile.district.clone(),
            bio: profile.bio.clone(),
            photos: profile.photos.clone(),
            score: viewer.score(profile),
        };

        if relations.swiped.contains(&id) {
            recycled.push(candidate);
        } else {
            fresh.push(candidate);
        }
    }

    // sort_by is stable
    fresh.sort_by(|a, b| b.score.cmp(&a.score));
    recycled.shuffle(rng);

    fresh.into_iter().chain(recycled).take(FEED_SIZE).collect()
}
