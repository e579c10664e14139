/// Swipe, discovery and match list endpoints
use crate::{
    auth::AuthUser,
    context::AppContext,
    discovery::DiscoveryCandidate,
    error::AppResult,
    matching::{MatchSummary, SwipeAction, SwipeOutcome},
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build matching routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/swipe", post(swipe))
        .route("/api/discovery", get(discovery))
        .route("/api/matches", get(list_matches))
}

#[derive(Debug, Deserialize)]
pub struct SwipeRequest {
    pub target_id: i64,
    pub action: String,
}

/// Record a like or dislike
async fn swipe(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Json(req): Json<SwipeRequest>,
) -> AppResult<Json<SwipeOutcome>> {
    let action = SwipeAction::from_str(&req.action)?;
    let outcome = ctx
        .ledger
        .record_swipe(auth.user_id, req.target_id, action)
        .await?;

    Ok(Json(outcome))
}

/// Ranked candidate feed
async fn discovery(
    State(ctx): State<AppContext>,
    auth: AuthUser,
) -> AppResult<Json<Vec<DiscoveryCandidate>>> {
    Ok(Json(ctx.discovery.discover(auth.user_id).await?))
}

/// Active matches, newest first
async fn list_matches(
    State(ctx): State<AppContext>,
    auth: AuthUser,
) -> AppResult<Json<Vec<MatchSummary>>> {
    Ok(Json(ctx.formation.list_matches(auth.user_id).await?))
}
