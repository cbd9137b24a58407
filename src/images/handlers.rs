use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tracing::{instrument, warn};

use super::intake::receive_image;
use crate::{auth::extractors::AuthUser, error::ApiError, state::AppState};

// Room for multipart boundaries, part headers and the small text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn process_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/process-image", post(process_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD))
}

/// POST /process-image (multipart, field `image`)
#[instrument(skip(state, mp))]
pub async fn process_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mp = mp.map_err(|e| {
        warn!(error = %e, "process-image without multipart body");
        ApiError::validation("Expected a multipart/form-data body")
    })?;

    let submission = receive_image(&state.uploads, state.config.upload.max_bytes, mp).await?;
    let audio = state.processor.relay(submission).await?;

    Ok(([(header::CONTENT_TYPE, audio.content_type)], audio.body).into_response())
}
