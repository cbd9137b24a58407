use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, PublicUser, SignupRequest, TokenResponse},
        errors::AuthError,
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo_types::NewUser,
        session::{issue_session, revoke_session},
    },
    error::ApiError,
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|e| {
        warn!(error = %e, "rejected request body");
        ApiError::validation("Invalid JSON body")
    })
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let body = json_body(payload)?;
    let password = body.password.unwrap_or_default();
    if password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let (Some(username), Some(email)) = (non_empty(body.username), non_empty(body.email)) else {
        warn!("signup with missing fields");
        return Err(ApiError::validation(
            "Username, email and password are required",
        ));
    };
    let username = username.trim().to_string();
    let email = email.trim().to_lowercase();

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation("Invalid email"));
    }

    // Pre-check only; a concurrent signup for the same email can still race
    // past this and is then stopped by the unique index as a 500.
    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(ApiError::validation("Email already registered"));
    }

    let password_hash = hash_password(&password)?;
    let user = state
        .users
        .create(NewUser {
            username,
            email,
            password_hash,
        })
        .await?;

    let keys = JwtKeys::from_ref(&state);
    let token = issue_session(&keys, state.sessions.as_ref(), user.id).await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let body = json_body(payload)?;
    // The password is compared exactly as signup stored it, so it is never trimmed.
    let password = body.password.filter(|p| !p.is_empty());
    let (Some(email), Some(password)) = (non_empty(body.email), password) else {
        return Err(ApiError::validation("Email and password are required"));
    };
    let email = email.trim().to_lowercase();

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AuthError::InvalidLogin.into());
    };

    if !verify_password(&password, &user.password_hash) {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AuthError::InvalidLogin.into());
    }

    let keys = JwtKeys::from_ref(&state);
    let token = issue_session(&keys, state.sessions.as_ref(), user.id).await?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, ApiError> {
    revoke_session(state.sessions.as_ref(), user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(user.into()))
}
