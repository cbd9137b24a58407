use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    auth::errors::AuthError,
    images::relay::{RelayError, UpstreamError},
};

/// Error returned by every handler. Rendered as `{"error": "..."}` unless the
/// processing engine supplied its own JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("processing engine responded with {}", .0.status)]
    Upstream(UpstreamError),

    #[error("Processing failed")]
    ProcessingFailed,

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(e) => e.status_code(),
            ApiError::Upstream(u) => u.status,
            ApiError::ProcessingFailed | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Upstream(u) => ApiError::Upstream(u),
            RelayError::Failed(_) => ApiError::ProcessingFailed,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            ApiError::Upstream(u) => {
                debug!(status = %u.status, "forwarding processing engine error");
                return (
                    u.status,
                    [(header::CONTENT_TYPE, u.content_type)],
                    u.body,
                )
                    .into_response();
            }
            ApiError::Validation(msg) => msg,
            ApiError::Auth(e) => {
                if status.is_server_error() {
                    error!(error = ?e, "auth store failure");
                    "Internal server error".to_string()
                } else {
                    e.to_string()
                }
            }
            ApiError::ProcessingFailed => "Processing failed".to_string(),
            ApiError::Internal(e) => {
                error!(error = ?e, "internal error");
                "Internal server error".to_string()
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
