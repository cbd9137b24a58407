use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::repo_types::{NewUser, SessionCheck, User};
use crate::config::DatabaseConfig;

/// Whether a presented credential is still the user's current one.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn check(&self, user_id: Uuid, token: &str) -> anyhow::Result<SessionCheck>;

    /// Replaces the stored token in one write. `None` ends the session.
    /// Returns `false` when no user has this id.
    async fn replace_token(&self, user_id: Uuid, token: Option<&str>) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, token, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, token, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, token, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .context("insert user")?;
        Ok(user)
    }
}

#[async_trait]
impl SessionStore for PgUserStore {
    async fn check(&self, user_id: Uuid, token: &str) -> anyhow::Result<SessionCheck> {
        let stored = sqlx::query_scalar::<_, Option<String>>(
            r#"SELECT token FROM users WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("load current token")?;

        Ok(match stored {
            None => SessionCheck::UnknownUser,
            Some(current) => SessionCheck::compare(current.as_deref(), token),
        })
    }

    async fn replace_token(&self, user_id: Uuid, token: Option<&str>) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"UPDATE users SET token = $2 WHERE id = $1"#)
            .bind(user_id)
            .bind(token)
            .execute(&self.db)
            .await
            .context("update current token")?;
        Ok(res.rows_affected() == 1)
    }
}
