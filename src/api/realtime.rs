/// WebSocket endpoint for per-user realtime events
///
/// Each connection subscribes to the caller's channel (`user:{id}`) and
/// receives JSON frames:
/// - `chat_message`: a message sent to or by this user
/// - `typing`: a matched partner is typing
///
/// Clients may send `{"type":"typing","receiver_id":N}` frames instead of
/// calling the HTTP typing endpoint. A client that cannot keep up with its
/// buffer loses events; one that stalls a send past the timeout is dropped.
use crate::{
    api::chat::record_typing,
    auth::AuthUser,
    context::AppContext,
    realtime::{ClientFrame, RealtimeEvent},
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use serde::Serialize;
use tokio::time::{interval, timeout, Duration, Instant};

/// Control frame sent by the server
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InfoFrame {
    Connected { user_id: i64 },
    Error { message: String },
}

/// Build realtime routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/realtime", get(subscribe))
}

/// Upgrade an authenticated request to a realtime connection
pub async fn subscribe(
    ws: WebSocketUpgrade,
    auth: AuthUser,
    State(ctx): State<AppContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, auth.user_id, ctx))
}

async fn handle_connection(socket: WebSocket, user_id: i64, ctx: AppContext) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = ctx.gateway.subscribe(user_id);
    let connection_id = subscription.connection_id;

    let send_timeout = Duration::from_millis(ctx.config.realtime.send_timeout_ms);
    let ping_every = Duration::from_secs(ctx.config.realtime.ping_interval_secs.max(1));

    if send_json(&mut sender, &InfoFrame::Connected { user_id }, send_timeout)
        .await
        .is_err()
    {
        ctx.gateway.unsubscribe(user_id, connection_id);
        return;
    }

    let mut ping_interval = interval(ping_every);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                let Some(event) = event else { break };
                match send_event(&mut sender, &event, send_timeout).await {
                    Ok(_) => {
                        last_activity = Instant::now();
                    }
                    Err(SendError::Timeout) => {
                        tracing::warn!("Send timeout for user {}, client may be slow", user_id);
                        break;
                    }
                    Err(SendError::Disconnected) => {
                        tracing::debug!("Client disconnected during send");
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if last_activity.elapsed() > ping_every
                    && sender.send(Message::Ping(vec![])).await.is_err()
                {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        if let Err(message) = handle_client_frame(&ctx, user_id, &text).await {
                            let frame = InfoFrame::Error { message };
                            if send_json(&mut sender, &frame, send_timeout).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!("Client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        tracing::debug!("Client disconnected");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    ctx.gateway.unsubscribe(user_id, connection_id);
}

/// Apply a client frame; the error string is reported back on the socket
async fn handle_client_frame(ctx: &AppContext, user_id: i64, text: &str) -> Result<(), String> {
    let frame: ClientFrame =
        serde_json::from_str(text).map_err(|e| format!("Invalid frame: {}", e))?;

    match frame {
        ClientFrame::Typing { receiver_id } => record_typing(ctx, user_id, receiver_id)
            .await
            .map_err(|e| e.to_string()),
    }
}

/// Error type for sending frames
#[derive(Debug)]
enum SendError {
    Timeout,
    Disconnected,
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &RealtimeEvent,
    send_timeout: Duration,
) -> Result<(), SendError> {
    send_json(sender, event, send_timeout).await
}

/// Serialize and send a frame, bounded by `send_timeout`
async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &T,
    send_timeout: Duration,
) -> Result<(), SendError> {
    let json = serde_json::to_string(frame).map_err(|_| SendError::Disconnected)?;

    match timeout(send_timeout, sender.send(Message::Text(json))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(SendError::Disconnected),
        Err(_) => Err(SendError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::create_memory_pool;

    #[test]
    fn test_info_frame_shape() {
        let json = serde_json::to_value(InfoFrame::Connected { user_id: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "connected", "user_id": 4}));
    }

    #[tokio::test]
    async fn test_client_typing_frame_reaches_partner() {
        let ctx = AppContext::from_pool(create_memory_pool().await.unwrap(), ServerConfig::for_tests());
        let mut partner = ctx.gateway.subscribe(2);

        handle_client_frame(&ctx, 1, r#"{"type":"typing","receiver_id":2}"#)
            .await
            .unwrap();

        assert!(ctx.presence.is_typing(1, 2));
        assert_eq!(
            partner.receiver.try_recv().unwrap(),
            RealtimeEvent::Typing { sender_id: 1 }
        );
    }

    #[tokio::test]
    async fn test_malformed_client_frame_is_reported() {
        let ctx = AppContext::from_pool(create_memory_pool().await.unwrap(), ServerConfig::for_tests());

        let err = handle_client_frame(&ctx, 1, "not json").await.unwrap_err();
        assert!(err.starts_with("Invalid frame"));

        let err = handle_client_frame(&ctx, 1, r#"{"type":"typing","receiver_id":1}"#)
            .await
            .unwrap_err();
        assert!(!err.is_empty());
    }
}
