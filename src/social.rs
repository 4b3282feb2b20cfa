//! `POST /user/{id}/follow`: toggles a follow relationship against
//! the caller's session. Follow is an upsert into `followedCreators` with
//! `score=0`, timestamps=now; unfollow removes the entry outright. Like the
//! engagement endpoints, this only ever touches the session's working
//! profile — persistence happens at merge-back, same as every other
//! session-mutating write.

use crate::error::AppResult;
use crate::models::FollowedCreator;
use crate::session_cookie::extract_session_id;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub following: bool,
}

pub async fn toggle_follow(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<Uuid>,
    headers: HeaderMap,
) -> AppResult<Json<FollowResponse>> {
    let session_id = extract_session_id(&headers).ok_or_else(|| crate::error::AppError::Auth("missing sid cookie".into()))?;
    let _guard = state.session_lifecycle.lock_session(&session_id).await;
    let Some(mut profile) = state.session_lifecycle.hydrate_working_profile(&session_id).await? else {
        return Err(crate::error::AppError::Auth("session not found".into()));
    };

    let already_following = profile.following.iter().any(|f| f.user_id == target_id);
    if already_following {
        profile.following.retain(|f| f.user_id != target_id);
    } else {
        let now = Utc::now();
        profile.following.push(FollowedCreator {
            user_id: target_id,
            score: 0.0,
            last_updated: now,
            skips: 0,
            last_skip_at: None,
            reentry_at: None,
        });
    }

    state.session_lifecycle.persist_working_profile(&session_id, &profile).await?;

    Ok(Json(FollowResponse { following: !already_following }))
}
