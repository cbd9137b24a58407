use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String, // unique, login key
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, not exposed in JSON
    #[serde(skip_serializing)]
    pub token: Option<String>, // current session credential, None when logged out
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Outcome of comparing a presented token with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Current,
    /// No active session, or a newer token replaced this one.
    Stale,
    UnknownUser,
}

impl SessionCheck {
    pub fn compare(stored: Option<&str>, presented: &str) -> Self {
        match stored {
            Some(current) if current.as_bytes() == presented.as_bytes() => SessionCheck::Current,
            _ => SessionCheck::Stale,
        }
    }
}
