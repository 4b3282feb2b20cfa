//! `GET /feed`: the HTTP edge in front of the feed assembler.
//! Refreshes an existing session's last-access clock, or establishes a new
//! one from the bearer token and sets the `sid` cookie, then hands the
//! resulting working profile to `FeedAssembler::assemble`.

use crate::error::AppError;
use crate::session_cookie::{apply_set_cookie, extract_session_id, set_cookie_header};
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct FeedEnvelope {
    status: u16,
    data: FeedData,
}

#[derive(Serialize)]
struct FeedData {
    posts: Vec<crate::models::FeedPost>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

pub async fn get_feed(State(state): State<Arc<AppState>>, headers: HeaderMap) -> crate::error::AppResult<impl IntoResponse> {
    let existing_sid = extract_session_id(&headers);

    let (session_id, set_cookie) = match existing_sid {
        Some(sid) if state.session_lifecycle.hydrate_working_profile(&sid).await?.is_some() => {
            state.session_lifecycle.refresh(&sid).await?;
            (sid, None)
        }
        _ => {
            let token = bearer_token(&headers).ok_or_else(|| AppError::Auth("missing sid cookie and bearer token".into()))?;
            let user_id = crate::auth::verify_token(token)?;
            let sid = state.session_lifecycle.start(user_id).await?;
            let cookie = set_cookie_header(&sid, state.config.session_ttl_seconds);
            (sid, Some(cookie))
        }
    };

    let profile = state
        .session_lifecycle
        .hydrate_working_profile(&session_id)
        .await?
        .ok_or_else(|| AppError::Auth("session vanished mid-request".into()))?;

    let posts = state.feed_assembler.assemble(&profile).await?;

    let mut response_headers = HeaderMap::new();
    if let Some(cookie) = set_cookie {
        apply_set_cookie(&mut response_headers, cookie);
    }

    Ok((response_headers, Json(FeedEnvelope { status: 200, data: FeedData { posts } })))
}
