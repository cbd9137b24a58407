use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{
    error::ApiError,
    storage::{TransientUpload, UploadDir},
};

pub const IMAGE_FIELD: &str = "image";

/// Optional hints the processing engine understands.
#[derive(Debug, Clone, Default)]
pub struct ProcessingOptions {
    pub ocr_lang: Option<String>,
    pub tts_lang: Option<String>,
}

/// An accepted upload, already on disk, plus what to forward with it.
#[derive(Debug)]
pub struct ImageSubmission {
    pub upload: TransientUpload,
    pub options: ProcessingOptions,
}

/// Reads the multipart body. The image is written to `uploads` as it
/// arrives; a rejected or oversized file never reaches the relay and its
/// partial file is removed.
pub async fn receive_image(
    uploads: &UploadDir,
    max_bytes: usize,
    mut mp: Multipart,
) -> Result<ImageSubmission, ApiError> {
    let mut upload: Option<TransientUpload> = None;
    let mut options = ProcessingOptions::default();

    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(IMAGE_FIELD) if upload.is_none() => {
                upload = store_image(uploads, max_bytes, field).await?;
            }
            Some(IMAGE_FIELD) => {
                return Err(ApiError::validation("Only one image may be uploaded"));
            }
            Some("ocr_lang") => options.ocr_lang = text_field(field).await?,
            Some("tts_lang") => options.tts_lang = text_field(field).await?,
            other => debug!(field = ?other, "ignoring unknown multipart field"),
        }
    }

    match upload {
        Some(upload) => Ok(ImageSubmission { upload, options }),
        None => Err(ApiError::validation("No file uploaded")),
    }
}

async fn store_image(
    uploads: &UploadDir,
    max_bytes: usize,
    mut field: Field<'_>,
) -> Result<Option<TransientUpload>, ApiError> {
    let file_name = match field.file_name() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Ok(None),
    };
    let content_type = field.content_type().unwrap_or_default().to_string();
    if !content_type.starts_with("image/") {
        warn!(content_type = %content_type, "rejected non-image upload");
        return Err(ApiError::validation("Only image files are allowed"));
    }

    let (mut upload, mut file) = uploads.create(&file_name, &content_type).await?;
    let mut written: usize = 0;
    // `upload` is dropped on every early return below, which removes the file.
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len();
        if written > max_bytes {
            warn!(limit = max_bytes, "upload exceeds size limit");
            return Err(too_large());
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("write upload")))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("flush upload")))?;

    if written == 0 {
        return Err(ApiError::validation("Uploaded file is empty"));
    }
    upload.set_len(written as u64);
    debug!(bytes = written, "upload stored");
    Ok(Some(upload))
}

async fn text_field(field: Field<'_>) -> Result<Option<String>, ApiError> {
    let value = field.text().await.map_err(multipart_error)?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

fn too_large() -> ApiError {
    ApiError::validation("File too large")
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!("request body exceeds limit");
        return too_large();
    }
    warn!(error = %e, "malformed multipart body");
    ApiError::validation("Malformed multipart body")
}
