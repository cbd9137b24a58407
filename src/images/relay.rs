use std::time::Duration;

use anyhow::Context;
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, instrument};

use super::intake::{ImageSubmission, ProcessingOptions};
use crate::{config::ProcessingConfig, storage::TransientUpload};

pub const DEFAULT_AUDIO_MIME: &str = "audio/mpeg";
pub const JSON_MIME: &str = "application/json";

/// Output of the processing engine, passed through untouched.
#[derive(Debug)]
pub struct ProcessedAudio {
    pub content_type: String,
    pub body: Bytes,
}

/// A JSON error body from the processing engine and the status it came with.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("processing engine rejected the image with {}", .0.status)]
    Upstream(UpstreamError),

    #[error("processing failed: {0:#}")]
    Failed(#[source] anyhow::Error),
}

/// Returns the error to forward when `body` is UTF-8 JSON, `None` otherwise.
pub fn try_parse_json_error(status: StatusCode, body: &Bytes) -> Option<UpstreamError> {
    let text = std::str::from_utf8(body).ok()?;
    serde_json::from_str::<serde_json::Value>(text).ok()?;
    Some(UpstreamError {
        status,
        content_type: JSON_MIME.to_string(),
        body: body.clone(),
    })
}

fn content_type_or_default(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_AUDIO_MIME)
        .to_string()
}

#[derive(Clone)]
pub struct ProcessingClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ProcessingClient {
    pub fn new(cfg: &ProcessingConfig) -> anyhow::Result<Self> {
        Self::with_timeout(cfg.url.clone(), cfg.timeout)
    }

    pub fn with_timeout(endpoint: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build processing http client")?;
        Ok(Self { http, endpoint })
    }

    /// Sends the upload to the processing engine. The transient file is
    /// removed before this returns, whatever the outcome.
    #[instrument(skip_all, fields(file = %submission.upload.file_name(), bytes = submission.upload.len()))]
    pub async fn relay(&self, submission: ImageSubmission) -> Result<ProcessedAudio, RelayError> {
        let ImageSubmission { upload, options } = submission;
        let outcome = self.forward(&upload, &options).await;
        upload.discard().await;

        match &outcome {
            Ok(audio) => info!(content_type = %audio.content_type, bytes = audio.body.len(), "processing succeeded"),
            Err(RelayError::Upstream(u)) => info!(status = %u.status, "processing engine returned an error"),
            Err(RelayError::Failed(e)) => error!(error = ?e, "processing failed"),
        }
        outcome
    }

    async fn forward(
        &self,
        upload: &TransientUpload,
        options: &ProcessingOptions,
    ) -> Result<ProcessedAudio, RelayError> {
        let file = tokio::fs::File::open(upload.path())
            .await
            .with_context(|| format!("open {}", upload.path().display()))
            .map_err(RelayError::Failed)?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, upload.len())
            .file_name(upload.file_name().to_string())
            .mime_str(upload.content_type())
            .context("invalid upload content type")
            .map_err(RelayError::Failed)?;

        let mut form = Form::new().part("image", part);
        if let Some(lang) = &options.ocr_lang {
            form = form.text("ocr_lang", lang.clone());
        }
        if let Some(lang) = &options.tts_lang {
            form = form.text("tts_lang", lang.clone());
        }

        debug!(endpoint = %self.endpoint, "sending image to processing engine");
        let res = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .context("send to processing engine")
            .map_err(RelayError::Failed)?;

        let status = res.status();
        if status.is_success() {
            let content_type = content_type_or_default(res.headers());
            let body = res
                .bytes()
                .await
                .context("read processing engine response")
                .map_err(RelayError::Failed)?;
            return Ok(ProcessedAudio { content_type, body });
        }

        let error_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
        let body = res
            .bytes()
            .await
            .context("read processing engine error body")
            .map_err(RelayError::Failed)?;
        match try_parse_json_error(status, &body) {
            Some(mut upstream) => {
                if let Some(content_type) = error_type {
                    upstream.content_type = content_type;
                }
                Err(RelayError::Upstream(upstream))
            }
            None => Err(RelayError::Failed(anyhow::anyhow!(
                "processing engine responded {status} with a non-JSON body"
            ))),
        }
    }
}
