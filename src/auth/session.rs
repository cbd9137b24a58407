use tracing::{debug, info};
use uuid::Uuid;

use super::{errors::AuthError, jwt::JwtKeys, repo::SessionStore};

/// Signs a fresh credential and stores it as the user's only valid one.
/// The token is returned only once the store write has succeeded.
pub async fn issue_session(
    keys: &JwtKeys,
    sessions: &dyn SessionStore,
    user_id: Uuid,
) -> Result<String, AuthError> {
    let token = keys.sign(user_id).map_err(AuthError::Internal)?;
    match sessions.replace_token(user_id, Some(&token)).await {
        Ok(true) => {
            debug!(%user_id, "session issued");
            Ok(token)
        }
        Ok(false) => Err(AuthError::StoreUnavailable(anyhow::anyhow!(
            "no user row for {user_id}"
        ))),
        Err(e) => Err(AuthError::StoreUnavailable(e)),
    }
}

pub async fn revoke_session(sessions: &dyn SessionStore, user_id: Uuid) -> Result<(), AuthError> {
    sessions
        .replace_token(user_id, None)
        .await
        .map_err(AuthError::StoreUnavailable)?;
    info!(%user_id, "session revoked");
    Ok(())
}
