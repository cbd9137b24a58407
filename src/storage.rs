//! Local disk area for uploads that live for a single request.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::fs::{File, OpenOptions};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_FILE_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub async fn init(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create upload dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a new, uniquely named file readable only by this process'
    /// user and returns it open for writing.
    pub async fn create(
        &self,
        original_name: &str,
        content_type: &str,
    ) -> anyhow::Result<(TransientUpload, File)> {
        let file_name = sanitize_file_name(original_name);
        let path = self.root.join(format!("{}_{}", Uuid::new_v4(), file_name));

        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let file = opts
            .open(&path)
            .await
            .with_context(|| format!("create {}", path.display()))?;

        debug!(path = %path.display(), "transient upload created");
        let upload = TransientUpload {
            path,
            file_name,
            content_type: content_type.to_string(),
            len: 0,
            removed: false,
        };
        Ok((upload, file))
    }
}

/// A file on disk owned by one request. It is removed by [`discard`] or, if
/// the request is dropped first, when this value is dropped.
///
/// [`discard`]: TransientUpload::discard
#[derive(Debug)]
pub struct TransientUpload {
    path: PathBuf,
    file_name: String,
    content_type: String,
    len: u64,
    removed: bool,
}

impl TransientUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn set_len(&mut self, len: u64) {
        self.len = len;
    }

    /// Best-effort removal. Failures are logged only.
    pub async fn discard(mut self) {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "transient upload removed"),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "failed to remove transient upload")
            }
        }
    }
}

impl Drop for TransientUpload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, path = %self.path.display(), "failed to remove abandoned upload");
            }
        }
    }
}

/// Keeps ASCII alphanumerics, `.`, `-` and `_`; strips leading dots.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            ' ' => '_',
            _ => '\0',
        })
        .filter(|c| *c != '\0')
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned: String = cleaned.chars().take(MAX_FILE_NAME_LEN).collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
