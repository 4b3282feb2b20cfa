//! Event pipeline: producers validate and publish engagement/score events
//! onto Redis streams, and two consumers drain them — one rolling the raw
//! engagement into the durable stat counters, the other buffering post score
//! deltas in-process (mirrored to the fast store for crash recovery) and
//! flushing them to Postgres once an hour instead of on every event.

use crate::error::{AppError, AppResult};
use crate::models::{EngagementEvent, EntityType, PostScoreEvent};
use crate::posts_store::PostsStore;
use crate::profile_store::ProfileStore;
use crate::redis_client::FastStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use uuid::Uuid;

const ENGAGEMENT_STREAM: &str = "engagement-events";
const SCORE_STREAM: &str = "post-score-events";

fn validate_engagement_event(e: &EngagementEvent) -> AppResult<()> {
    if e.category.trim().is_empty() {
        return Err(AppError::Validation("engagement event category must not be empty".into()));
    }
    if !e.engagement_score.is_finite() {
        return Err(AppError::Validation("engagement event score must be finite".into()));
    }
    Ok(())
}

fn validate_score_event(e: &PostScoreEvent) -> AppResult<()> {
    if !e.score_delta.is_finite() {
        return Err(AppError::Validation("score event delta must be finite".into()));
    }
    Ok(())
}

/// Publishes validated events onto Redis streams. One reconnect is attempted
/// transparently on a transport failure; anything past that surfaces as a
/// non-retriable `AppError::Producer` rather than being queued client-side.
#[derive(Clone)]
pub struct EventProducer {
    manager: ConnectionManager,
}

impl EventProducer {
    pub async fn new(redis_url: &str) -> AppResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    async fn publish(&self, stream: &str, payload: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let first: redis::RedisResult<String> = conn.xadd(stream, "*", &[("payload", payload)]).await;
        if first.is_ok() {
            return Ok(());
        }

        let mut retry_conn = self.manager.clone();
        retry_conn
            .xadd::<_, _, _, String>(stream, "*", &[("payload", payload)])
            .await
            .map(|_| ())
            .map_err(|e| AppError::Producer(e.to_string()))
    }

    pub async fn publish_engagement(&self, event: &EngagementEvent) -> AppResult<()> {
        validate_engagement_event(event)?;
        let payload = serde_json::to_string(event).expect("EngagementEvent always serializes");
        self.publish(ENGAGEMENT_STREAM, &payload).await
    }

    pub async fn publish_score_event(&self, event: &PostScoreEvent) -> AppResult<()> {
        validate_score_event(event)?;
        let payload = serde_json::to_string(event).expect("PostScoreEvent always serializes");
        self.publish(SCORE_STREAM, &payload).await
    }
}

/// Drains `engagement-events` via a consumer group and rolls each one into
/// the global/user-interest/creator counters and the post's own impression
/// and engagement-sum columns.
pub struct EngagementStatsConsumer {
    manager: ConnectionManager,
    profile_store: ProfileStore,
    posts: PostsStore,
    group: String,
    consumer_name: String,
}

impl EngagementStatsConsumer {
    pub async fn new(
        redis_url: &str,
        profile_store: ProfileStore,
        posts: PostsStore,
        consumer_name: impl Into<String>,
    ) -> AppResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        let mut setup = manager.clone();
        let _: redis::RedisResult<()> = setup.xgroup_create_mkstream(ENGAGEMENT_STREAM, "engagement-stats", "$").await;
        Ok(Self {
            manager,
            profile_store,
            posts,
            group: "engagement-stats".to_string(),
            consumer_name: consumer_name.into(),
        })
    }

    /// Reads and acknowledges one batch; returns the number processed. The
    /// caller loops this in a spawned task with a short idle sleep between
    /// empty batches.
    pub async fn process_batch(&self) -> AppResult<usize> {
        let mut conn = self.manager.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(&self.group, &self.consumer_name)
            .count(100)
            .block(2000);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[ENGAGEMENT_STREAM], &[">"], &opts)
            .await?;

        let mut processed = 0usize;
        for key in reply.keys {
            for id in key.ids {
                let Some(redis::Value::Data(raw)) = id.map.get("payload") else {
                    continue;
                };
                let Ok(payload) = String::from_utf8(raw.clone()) else {
                    let _: () = conn.xack(ENGAGEMENT_STREAM, &self.group, &[&id.id]).await?;
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<EngagementEvent>(&payload) {
                    self.apply(&event).await?;
                }
                let _: () = conn.xack(ENGAGEMENT_STREAM, &self.group, &[&id.id]).await?;
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn apply(&self, event: &EngagementEvent) -> AppResult<()> {
        self.profile_store
            .incr_global_stats(EntityType::Category, &event.category, event.engagement_score)
            .await?;
        self.profile_store
            .incr_user_interest_stats(event.user_id, EntityType::Category, &event.category, event.engagement_score)
            .await?;

        if let Some(sub) = &event.sub_category {
            let qualified = format!("{}/{}", event.category, sub);
            self.profile_store
                .incr_global_stats(EntityType::Subcategory, &qualified, event.engagement_score)
                .await?;
            self.profile_store
                .incr_user_interest_stats(event.user_id, EntityType::Subcategory, &qualified, event.engagement_score)
                .await?;
        }

        self.profile_store
            .incr_creator_stats(event.creator_id, event.engagement_score)
            .await?;
        self.posts.incr_counters(event.post_id, event.engagement_score).await?;
        Ok(())
    }
}

/// Buffers `post-score-events` deltas by post id in-process, mirrors each
/// delta to the fast store's recovery hash so a crash between hourly
/// flushes doesn't lose anything already ack'd off the stream, and flushes
/// everything to Postgres on an hourly tick.
pub struct ScoreAggregator {
    manager: ConnectionManager,
    fast_store: FastStore,
    buffer: Arc<DashMap<Uuid, f64>>,
    group: String,
    consumer_name: String,
}

impl ScoreAggregator {
    pub async fn new(redis_url: &str, fast_store: FastStore, consumer_name: impl Into<String>) -> AppResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        let mut setup = manager.clone();
        let _: redis::RedisResult<()> = setup.xgroup_create_mkstream(SCORE_STREAM, "score-aggregator", "$").await;
        Ok(Self {
            manager,
            fast_store,
            buffer: Arc::new(DashMap::new()),
            group: "score-aggregator".to_string(),
            consumer_name: consumer_name.into(),
        })
    }

    /// Restores the in-process buffer from the fast store's mirror hash.
    /// Called once at startup, before the consumer loop begins reading new
    /// events, so a restart doesn't lose whatever had accumulated since the
    /// last hourly flush.
    pub async fn hydrate(&self) -> AppResult<()> {
        for (post_id, delta) in self.fast_store.drain_score_buffer().await? {
            self.buffer.insert(post_id, delta);
        }
        Ok(())
    }

    pub async fn process_batch(&self) -> AppResult<usize> {
        let mut conn = self.manager.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(&self.group, &self.consumer_name)
            .count(200)
            .block(2000);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[SCORE_STREAM], &[">"], &opts)
            .await?;

        let mut processed = 0usize;
        for key in reply.keys {
            for id in key.ids {
                if let Some(redis::Value::Data(raw)) = id.map.get("payload") {
                    if let Ok(payload) = String::from_utf8(raw.clone()) {
                        if let Ok(event) = serde_json::from_str::<PostScoreEvent>(&payload) {
                            *self.buffer.entry(event.post_id).or_insert(0.0) += event.score_delta;
                            self.fast_store
                                .buffer_score_delta(event.post_id, event.score_delta)
                                .await?;
                        }
                    }
                }
                let _: () = conn.xack(SCORE_STREAM, &self.group, &[&id.id]).await?;
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Drains the in-process buffer (and the fast-store mirror) and hands
    /// back the accumulated per-post deltas for the caller to fold into
    /// `PostMetricsEngine`. Called hourly, and once more on shutdown (where
    /// `min_age_ms = 0` so every remaining entry goes out regardless of age).
    ///
    /// A post whose `lastTrendingUpdate` is younger than `min_age_ms` stays
    /// buffered for the next tick — the request path already nudged its
    /// metrics recently, and folding the buffered delta in now would just
    /// mean two EMA updates back to back instead of one that reflects the
    /// full hour's signal.
    pub async fn flush(&self, posts: &PostsStore, now: DateTime<Utc>, min_age_ms: i64) -> AppResult<Vec<(Uuid, f64)>> {
        let candidates: Vec<(Uuid, f64)> = self.buffer.iter().map(|e| (*e.key(), *e.value())).collect();
        let mut drained = Vec::with_capacity(candidates.len());
        for (post_id, delta) in candidates {
            let age_ms = match posts.load(post_id).await? {
                Some(post) => (now - post.last_trending_update).num_milliseconds(),
                None => i64::MAX,
            };
            if age_ms < min_age_ms {
                continue;
            }
            self.buffer.remove(&post_id);
            self.fast_store.remove_from_score_buffer(post_id).await?;
            drained.push((post_id, delta));
        }
        Ok(drained)
    }
}
