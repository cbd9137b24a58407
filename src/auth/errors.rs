use axum::http::StatusCode;
use thiserror::Error;

/// Failures of the credential lifecycle. Everything except the store
/// variants is a client-actionable 401.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header missing")]
    MissingCredential,

    #[error("Malformed authorization header")]
    MalformedCredential,

    #[error("Invalid or expired token")]
    InvalidCredential,

    // Same message as InvalidCredential so the response does not reveal
    // whether the account still exists.
    #[error("Invalid or expired token")]
    UserNotFound,

    #[error("Session has been revoked")]
    CredentialRevoked,

    #[error("Invalid credentials")]
    InvalidLogin,

    #[error("session store unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("auth internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::StoreUnavailable(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}
