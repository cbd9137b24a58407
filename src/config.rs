use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a request may wait for a pooled connection before failing.
    pub acquire_timeout: Duration,
}

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub processing: ProcessingConfig,
    pub upload: UploadConfig,
}

pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_PROCESSING_TIMEOUT_SECS: u64 = 120;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            acquire_timeout: Duration::from_secs(env_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 30)),
        };
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "readaloud".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "readaloud-users".into()),
        };
        let processing = ProcessingConfig {
            url: std::env::var("PROCESSING_URL")
                .unwrap_or_else(|_| "http://localhost:5000/process".into()),
            timeout: Duration::from_secs(env_or(
                "PROCESSING_TIMEOUT_SECS",
                DEFAULT_PROCESSING_TIMEOUT_SECS,
            )),
        };
        let upload = UploadConfig {
            dir: std::env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "tmp_uploads".into())
                .into(),
            max_bytes: env_or("UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES),
        };
        Ok(Self {
            database,
            jwt,
            processing,
            upload,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
