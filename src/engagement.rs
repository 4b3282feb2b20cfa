//! `/engagement/positive` and `/engagement/negative` (C12): the engagement
//! controller invoked by the HTTP edge. Both work against the session's
//! transient working profile — persistence to Postgres only happens at
//! merge-back — and both fire the corresponding event onto the pipeline so
//! the durable counters catch up asynchronously. The post metrics update
//! also happens inline on the request path as a best-effort estimate; the
//! hourly aggregator is the authoritative single-writer for the same post.

use crate::events::EventProducer;
use crate::models::{EngagementEvent, EngagementType, FollowedCreator, PostScoreEvent};
use crate::scoring::EmaMode;
use crate::session_cookie::extract_session_id;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PositiveEngagementBody {
    pub post_id: Uuid,
    #[serde(default)]
    pub viewed: u8,
    #[serde(default)]
    pub completed: u8,
    #[serde(default)]
    pub liked: u8,
    #[serde(default)]
    pub commented: u8,
    #[serde(default)]
    pub shared: u8,
    #[serde(default)]
    pub followed: u8,
}

#[derive(Debug, Deserialize)]
pub struct PositiveEngagementRequest {
    pub engagement: PositiveEngagementBody,
}

#[derive(Debug, Deserialize)]
pub struct NegativeSkipBody {
    pub post_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct NegativeEngagementRequest {
    pub skip: NegativeSkipBody,
}

/// Sums the engagement weight table over every flag the caller set to 1.
fn engagement_weight(body: &PositiveEngagementBody) -> f64 {
    let mut total = 0.0;
    if body.viewed != 0 {
        total += EngagementType::View.weight();
    }
    if body.liked != 0 {
        total += EngagementType::Like.weight();
    }
    if body.commented != 0 {
        total += EngagementType::Comment.weight();
    }
    if body.shared != 0 {
        total += EngagementType::Share.weight();
    }
    if body.completed != 0 {
        total += EngagementType::Completion.weight();
    }
    total
}

pub async fn positive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PositiveEngagementRequest>,
) -> crate::error::AppResult<()> {
    let body = body.engagement;
    if body.viewed == 0 && body.liked == 0 && body.commented == 0 && body.shared == 0 && body.completed == 0 && body.followed == 0 {
        return Err(crate::error::AppError::Validation("at least one engagement flag must be set".into()));
    }

    let session_id = extract_session_id(&headers).ok_or_else(|| crate::error::AppError::Auth("missing sid cookie".into()))?;
    let _guard = state.session_lifecycle.lock_session(&session_id).await;
    let Some(mut profile) = state.session_lifecycle.hydrate_working_profile(&session_id).await? else {
        return Err(crate::error::AppError::Auth("session not found".into()));
    };

    let Some(post) = state.post_metrics.load(body.post_id).await? else {
        return Err(crate::error::AppError::NotFound(format!("post {}", body.post_id)));
    };

    let engagement_score = engagement_weight(&body);

    if engagement_score > 0.0 {
        state
            .interest_service
            .score_interest(
                &mut profile,
                EmaMode::Session,
                &post.category,
                post.sub_category.as_deref(),
                post.specific.as_deref(),
                engagement_score,
            )
            .await?;
        state
            .creator_service
            .score_creator(&mut profile, EmaMode::Session, post.creator, engagement_score);
    }

    if body.followed != 0 && !profile.following.iter().any(|f| f.user_id == post.creator) {
        let now = Utc::now();
        profile.following.push(FollowedCreator {
            user_id: post.creator,
            score: 0.0,
            last_updated: now,
            skips: 0,
            last_skip_at: None,
            reentry_at: None,
        });
    }

    profile.seen_posts.insert(body.post_id);
    state.session_lifecycle.persist_working_profile(&session_id, &profile).await?;

    if engagement_score > 0.0 {
        // Best-effort inline metrics update; the hourly aggregator is the
        // authoritative writer for the same post.
        if let Err(e) = state.post_metrics.apply_engagement(body.post_id, engagement_score).await {
            tracing::warn!(post_id = %body.post_id, error = %e, "inline post metrics update failed");
        }

        state
            .event_producer
            .publish_engagement(&EngagementEvent {
                post_id: body.post_id,
                user_id: profile.user_id,
                category: post.category.clone(),
                sub_category: post.sub_category.clone(),
                creator_id: post.creator,
                engagement_score,
            })
            .await?;
        state
            .event_producer
            .publish_score_event(&PostScoreEvent {
                post_id: body.post_id,
                user_id: profile.user_id,
                engagement_type: if body.shared != 0 {
                    EngagementType::Share
                } else if body.completed != 0 {
                    EngagementType::Completion
                } else if body.commented != 0 {
                    EngagementType::Comment
                } else if body.liked != 0 {
                    EngagementType::Like
                } else {
                    EngagementType::View
                },
                score_delta: engagement_score,
                timestamp: Utc::now(),
            })
            .await?;
    }

    Ok(())
}

pub async fn negative(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NegativeEngagementRequest>,
) -> crate::error::AppResult<()> {
    let post_id = body.skip.post_id;
    let session_id = extract_session_id(&headers).ok_or_else(|| crate::error::AppError::Auth("missing sid cookie".into()))?;
    let _guard = state.session_lifecycle.lock_session(&session_id).await;
    let Some(mut profile) = state.session_lifecycle.hydrate_working_profile(&session_id).await? else {
        return Err(crate::error::AppError::Auth("session not found".into()));
    };

    let Some(post) = state.post_metrics.load(post_id).await? else {
        return Err(crate::error::AppError::NotFound(format!("post {}", post_id)));
    };

    state.interest_service.skip_interest(&mut profile, post.category.as_str(), post.sub_category.as_deref(), post.specific.as_deref());
    state.creator_service.skip_creator(&mut profile, post.creator);
    profile.seen_posts.insert(post_id);

    state.session_lifecycle.persist_working_profile(&session_id, &profile).await?;

    state
        .event_producer
        .publish_score_event(&PostScoreEvent {
            post_id,
            user_id: profile.user_id,
            engagement_type: EngagementType::View,
            score_delta: state.config.skip_weight,
            timestamp: Utc::now(),
        })
        .await?;

    Ok(())
}
