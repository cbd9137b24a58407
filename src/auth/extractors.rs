use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderValue},
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{errors::AuthError, jwt::JwtKeys, repo::SessionStore, repo_types::SessionCheck};
use crate::{error::ApiError, state::AppState};

/// Admitted caller. Extraction runs the full check: header shape, signature
/// and expiry, then comparison against the stored current token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let header = parts.headers.get(axum::http::header::AUTHORIZATION);
        let user_id = authorize(&keys, state.sessions.as_ref(), header).await?;
        Ok(AuthUser(user_id))
    }
}

pub async fn authorize(
    keys: &JwtKeys,
    sessions: &dyn SessionStore,
    header: Option<&HeaderValue>,
) -> Result<Uuid, AuthError> {
    let token = bearer_token(header)?;

    let claims = keys.verify(token).map_err(|e| {
        debug!(error = %e, "token failed verification");
        AuthError::InvalidCredential
    })?;

    match sessions.check(claims.sub, token).await {
        Ok(SessionCheck::Current) => Ok(claims.sub),
        Ok(SessionCheck::Stale) => {
            debug!(user_id = %claims.sub, "token is not the current session");
            Err(AuthError::CredentialRevoked)
        }
        Ok(SessionCheck::UnknownUser) => {
            warn!(user_id = %claims.sub, "validly signed token for unknown user");
            Err(AuthError::UserNotFound)
        }
        Err(e) => Err(AuthError::Internal(e)),
    }
}

// Exactly "Bearer <token>", split on a single space.
fn bearer_token(header: Option<&HeaderValue>) -> Result<&str, AuthError> {
    let raw = header.ok_or(AuthError::MissingCredential)?;
    let raw = raw.to_str().map_err(|_| AuthError::MalformedCredential)?;
    let mut parts = raw.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MalformedCredential),
    }
}
