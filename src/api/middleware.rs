/// Authentication and account status middleware
use crate::{
    auth::{token_from_query, verify_access_token, AuthUser},
    context::AppContext,
    error::AppError,
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Account status enforcement middleware
///
/// For requests carrying a valid token: rejects banned accounts, refreshes
/// `last_activity` on reads, and stores the [`AuthUser`] for the extractor.
/// Requests without a usable token pass through; handlers that need a user
/// reject them.
pub async fn check_account_status(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(req.headers()).or_else(|| token_from_query(req.uri().query()));

    if let Some(token) = token {
        if let Ok(user_id) = verify_access_token(&token, &ctx.config.authentication.jwt_secret) {
            let user = match ctx.accounts.get_user(user_id).await {
                Ok(user) => user,
                Err(AppError::NotFound(_)) => {
                    return Err(AppError::Authentication("Unknown user".to_string()));
                }
                Err(e) => return Err(e),
            };

            if user.status.is_banned() {
                return Err(AppError::AccountRestricted(format!(
                    "Account is {}",
                    user.status.as_str()
                )));
            }

            if req.method() == Method::GET {
                ctx.accounts.touch_activity(user_id, Utc::now()).await?;
            }

            req.extensions_mut().insert(AuthUser { user_id });
        }
    }

    Ok(next.run(req).await)
}
