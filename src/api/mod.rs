/// API routes and handlers
pub mod calls;
pub mod chat;
pub mod health;
pub mod matching;
pub mod middleware;
pub mod realtime;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(matching::routes())
        .merge(chat::routes())
        .merge(calls::routes())
        .merge(realtime::routes())
}
