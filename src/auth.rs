/// Authentication extractors and utilities
///
/// Access tokens are HS256 JWTs issued by the account service. The `sub`
/// claim carries the numeric user id.
use crate::{api::middleware::extract_bearer_token, context::AppContext, error::AppError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Token claims understood by this service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

/// Authenticated user, extracted from the bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        // Status middleware may already have validated this request
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(*user);
        }

        let token = extract_bearer_token(&parts.headers)
            .or_else(|| token_from_query(parts.uri.query()))
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let user_id = verify_access_token(&token, &state.config.authentication.jwt_secret)?;
        Ok(AuthUser { user_id })
    }
}

/// Browser websocket clients cannot set headers; they pass `?token=`
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Verify a JWT and return the user id in its `sub` claim
pub fn verify_access_token(token: &str, jwt_secret: &str) -> Result<i64, AppError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew
    validation.leeway = 60;

    let data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::Authentication("Token has expired".to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                AppError::Authentication("Invalid token signature".to_string())
            }
            _ => AppError::Authentication(format!("Invalid token: {}", e)),
        }
    })?;

    data.claims
        .sub
        .parse()
        .map_err(|_| AppError::Authentication("Invalid token subject".to_string()))
}

/// Mint a token for `user_id`; used by tooling and tests
pub fn issue_token(user_id: i64, jwt_secret: &str, ttl: chrono::Duration) -> Result<String, AppError> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

    #[test]
    fn test_token_round_trip() {
        let token = issue_token(42, SECRET, chrono::Duration::hours(1)).unwrap();
        assert_eq!(verify_access_token(&token, SECRET).unwrap(), 42);
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired() {
        let token = issue_token(42, SECRET, chrono::Duration::hours(1)).unwrap();
        assert!(verify_access_token(&token, "another-secret-that-is-long-enough").is_err());

        let expired = issue_token(42, SECRET, chrono::Duration::hours(-2)).unwrap();
        assert!(matches!(
            verify_access_token(&expired, SECRET),
            Err(AppError::Authentication(_))
        ));
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(token_from_query(Some("a=1&token=abc")), Some("abc".to_string()));
        assert_eq!(token_from_query(Some("token=")), None);
        assert_eq!(token_from_query(None), None);
    }
}
