/// Chat endpoints
///
/// Sending persists first and then fans the stored record out through the
/// realtime gateway. Delivery problems never fail the request.
use crate::{
    auth::AuthUser,
    chat::{ChatHistory, ChatMessageRecord, ConversationSummary, NewMessage},
    context::AppContext,
    error::{AppError, AppResult},
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build chat routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/chat/messages", post(send_message).get(history))
        .route("/api/chat/conversations", get(conversations))
        .route("/api/chat/typing", post(typing))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(alias = "receiver")]
    pub receiver_id: i64,
    #[serde(flatten)]
    pub message: NewMessage,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub receiver_id: i64,
}

async fn send_message(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<ChatMessageRecord>)> {
    let record = ctx
        .messages
        .send(auth.user_id, req.receiver_id, &req.message)
        .await?;

    let delivered = ctx.gateway.publish_chat_message(&record);
    tracing::debug!("Message {} delivered to {} connections", record.id, delivered);

    Ok((StatusCode::CREATED, Json(record)))
}

async fn history(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<ChatHistory>> {
    Ok(Json(ctx.messages.history(auth.user_id, params.user_id).await?))
}

async fn conversations(
    State(ctx): State<AppContext>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(ctx.messages.conversations(auth.user_id).await?))
}

async fn typing(
    State(ctx): State<AppContext>,
    auth: AuthUser,
    Json(req): Json<TypingRequest>,
) -> AppResult<Json<serde_json::Value>> {
    record_typing(&ctx, auth.user_id, req.receiver_id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Shared by the HTTP endpoint and realtime client frames
pub async fn record_typing(ctx: &AppContext, sender: i64, receiver: i64) -> AppResult<()> {
    if sender == receiver {
        return Err(AppError::InvalidTarget("Cannot type to yourself".to_string()));
    }

    if ctx.accounts.is_blocked_between(sender, receiver).await? {
        return Err(AppError::Forbidden("You cannot message this user.".to_string()));
    }

    ctx.presence.mark_typing(sender, receiver);
    ctx.gateway.publish_typing(sender, receiver);
    Ok(())
}
