//! Bearer-token validation.
//!
//! Token issuance and refresh live in the identity service; this crate only
//! validates the `Authorization` header enough to know which user is asking,
//! which the settlement path needs for its ownership check.

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// Expiry (seconds since epoch)
    pub exp: usize,
    /// Issued at (seconds since epoch)
    pub iat: usize,
}

/// The authenticated caller. Extraction fails with 401 when the header is
/// missing or the token does not verify.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| ServiceError::AuthError(format!("invalid token: {e}")))?;
    Ok(data.claims)
}

/// Issues a short-lived HS256 token. Used by tests and local tooling; the
/// production issuer is the identity service.
pub fn issue_token(secret: &str, user_id: Uuid, ttl_secs: usize) -> Result<String, ServiceError> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        exp: now + ttl_secs,
        iat: now,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::AuthError(format!("failed to sign token: {e}")))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts)
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;
        let claims = validate_token(&app_state.config.jwt_secret, token)?;
        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
