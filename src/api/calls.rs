/// Call signaling endpoints
///
/// Clients exchange SDP through these endpoints and poll for state; media
/// never touches the server.
use crate::{
    auth::AuthUser,
    calls::{CallPoll, CallView},
    context::AppContext,
    error::AppResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build call routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/calls/start", post(start_call))
        .route("/api/calls/poll", get(poll_calls))
        .route("/api/calls/:id/answer", post(answer_call))
        .route("/api/calls/:id/reject", post(reject_call))
        .route("/api/calls/:id/end", post(end_call))
}

#[derive(Debug, Deserialize)]
pub struct StartCallRequest {
    #[serde(alias = "receiver_id")]
    pub receiver: i64,
    #[serde(alias = "offer")]
    pub sdp_offer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnswerCallRequest {
    #[serde(alias = "answer")]
    pub sdp_answer: Option<String>,
}

async fn start_call(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Json(req): Json<StartCallRequest>,
) -> AppResult<(StatusCode, Json<CallView>)> {
    let call = ctx
        .calls
        .start(auth.user_id, req.receiver, req.sdp_offer.as_deref())
        .await?;

    tracing::info!("Call {} started: {} -> {}", call.id, call.caller, call.receiver);
    Ok((StatusCode::CREATED, Json(call)))
}

async fn answer_call(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Path(call_id): Path<i64>,
    Json(req): Json<AnswerCallRequest>,
) -> AppResult<Json<CallView>> {
    let call = ctx
        .calls
        .answer(call_id, req.sdp_answer.as_deref(), auth.user_id)
        .await?;
    Ok(Json(call))
}

async fn reject_call(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Path(call_id): Path<i64>,
) -> AppResult<Json<CallView>> {
    Ok(Json(ctx.calls.reject(call_id, auth.user_id).await?))
}

async fn end_call(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Path(call_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let call = ctx.calls.end(call_id, auth.user_id).await?;
    Ok(Json(serde_json::json!({
        "status": call.status.as_str(),
        "call": call,
    })))
}

async fn poll_calls(State(ctx): State<AppContext>, auth: AuthUser) -> AppResult<Json<CallPoll>> {
    Ok(Json(ctx.calls.poll(auth.user_id).await?))
}
