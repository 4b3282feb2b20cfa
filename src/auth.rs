//! Signup/login: an external collaborator per the system's scope — feed
//! ranking only needs the `user_id` identity these endpoints establish, not
//! a full account lifecycle. Kept as a thin argon2 + JWT pair so there's
//! still something behind `sid` cookie issuance to authenticate against;
//! profile pages, settings, avatars, and the rest of account management are
//! out of scope here.

use crate::error::{AppError, AppResult};
use crate::session_cookie::{apply_set_cookie, expire_cookie_header, extract_session_id};
use crate::AppState;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::{Json, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: usize,
}

#[derive(Deserialize)]
pub struct SignupInput {
    username: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct LoginInput {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    token: String,
    user_id: Uuid,
    username: String,
}

fn issue_token(user_id: Uuid) -> AppResult<String> {
    let claims = Claims {
        sub: user_id,
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret("supersecret".as_ref()))
        .map_err(|e| AppError::Auth(format!("token generation failed: {e}")))
}

/// Recovers the `user_id` carried by a bearer token — used only to
/// establish identity for a brand-new session (see `feed::get_feed`); once a
/// session exists the `sid` cookie alone is authoritative.
pub fn verify_token(token: &str) -> AppResult<Uuid> {
    let data = decode::<Claims>(token, &DecodingKey::from_secret("supersecret".as_ref()), &Validation::default())
        .map_err(|e| AppError::Auth(format!("invalid token: {e}")))?;
    Ok(data.claims.sub)
}

pub async fn signup(State(state): State<Arc<AppState>>, Json(payload): Json<SignupInput>) -> AppResult<Json<AuthResponse>> {
    let salt = argon2::password_hash::SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Auth(format!("failed to hash password: {e}")))?
        .to_string();

    let row: (Uuid, String) = sqlx::query_as(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) RETURNING id, username",
    )
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&password_hash)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("duplicate") || e.to_string().contains("unique") {
            AppError::Validation("username or email already exists".into())
        } else {
            AppError::Store(e)
        }
    })?;
    let (user_id, username) = row;

    state.profile_store.load_or_create(user_id).await?;

    Ok(Json(AuthResponse { token: issue_token(user_id)?, user_id, username }))
}

pub async fn login(State(state): State<Arc<AppState>>, Json(payload): Json<LoginInput>) -> AppResult<Json<AuthResponse>> {
    let row: (Uuid, String, String) = sqlx::query_as("SELECT id, username, password_hash FROM users WHERE username = $1")
        .bind(&payload.username)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::Auth("invalid username or password".into()))?;
    let (user_id, username, password_hash) = row;

    let parsed_hash = PasswordHash::new(&password_hash).map_err(|e| AppError::Auth(format!("corrupt password hash: {e}")))?;
    Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::Auth("invalid username or password".into()))?;

    Ok(Json(AuthResponse { token: issue_token(user_id)?, user_id, username }))
}

/// Explicit logout (C9's other session-teardown path, alongside the expiry
/// worker): merges whatever the session accumulated back into the
/// persistent profile, tears the blob and sorted-set entry down, and clears
/// the `sid` cookie client-side. A missing/already-gone session is a no-op,
/// not an error.
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    if let Some(session_id) = extract_session_id(&headers) {
        state.session_lifecycle.merge_back(&session_id).await?;
    }

    let mut response_headers = HeaderMap::new();
    apply_set_cookie(&mut response_headers, expire_cookie_header());
    Ok((response_headers, Json(serde_json::json!({ "status": "ok" }))))
}
