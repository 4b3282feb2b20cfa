//! Background sweeps, modeled on an `ExpirationService`-style design: spawned
//! tasks ticking on a fixed interval, scanning in batches via a cursor so a
//! sweep never holds a whole table in memory, and isolating failures
//! per-row so one bad record doesn't kill the sweep.
//!
//! The daily rising-decay sweep runs over user profiles, not posts: it's
//! the user-side "interest gets stale if you stop engaging" counterpart to
//! the post-side trending/rising recompute that already happens on every
//! engagement inside `PostMetricsEngine::record_engagement`. The 2-hourly
//! evergreen sweep is the post-side job.

use crate::config::Config;
use crate::post_metrics::PostMetricsEngine;
use crate::posts_store::PostsStore;
use crate::profile_store::ProfileStore;
use chrono::Utc;
use uuid::Uuid;

const SCAN_BATCH: i64 = 500;

#[derive(Clone)]
pub struct ScheduledJobs {
    posts: PostsStore,
    profile_store: ProfileStore,
    metrics: PostMetricsEngine,
    config: Config,
}

impl ScheduledJobs {
    pub fn new(posts: PostsStore, profile_store: ProfileStore, metrics: PostMetricsEngine, config: Config) -> Self {
        Self { posts, profile_store, metrics, config }
    }

    /// Daily: multiplies every rising-pool score in every user profile by
    /// `DECAY_FACTOR` — `risingInterests[*].score`, `topInterests[*].risingSubs[*].score`,
    /// `risingInterests[*].risingSubs[*].score`, and
    /// `creatorsInterests.risingCreators[*].score` — touching `lastUpdated`
    /// on whatever it decays.
    pub async fn run_rising_decay_sweep(&self) {
        let factor = self.config.rising_decay_factor;
        let mut cursor: Option<Uuid> = None;
        loop {
            let batch = match self.profile_store.scan_users_after(cursor, SCAN_BATCH).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(error = %e, "rising decay sweep: batch scan failed");
                    return;
                }
            };
            if batch.is_empty() {
                break;
            }
            cursor = batch.last().map(|p| p.user_id);

            for mut profile in batch {
                let now = Utc::now();

                for cat in &mut profile.rising_interests {
                    cat.score *= factor;
                    cat.last_updated = now;
                    for sub in &mut cat.rising_subs {
                        sub.score *= factor;
                        sub.last_updated = now;
                    }
                }
                for cat in &mut profile.top_interests {
                    for sub in &mut cat.rising_subs {
                        sub.score *= factor;
                        sub.last_updated = now;
                    }
                }
                for node in &mut profile.creators_interests.rising_creators {
                    node.score *= factor;
                    node.last_updated = now;
                }

                if let Err(e) = self.profile_store.save(&profile).await {
                    tracing::warn!(user_id = %profile.user_id, error = %e, "rising decay sweep: save failed, skipping");
                }
            }
        }
    }

    /// Every 2 hours: recomputes the evergreen flag for every post, via
    /// `PostMetricsEngine::recompute_evergreen`, saving only the posts whose
    /// flag actually flips.
    pub async fn run_evergreen_sweep(&self) {
        let mut cursor: Option<Uuid> = None;
        loop {
            let batch = match self.posts.scan_after(cursor, SCAN_BATCH).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(error = %e, "evergreen sweep: batch scan failed");
                    return;
                }
            };
            if batch.is_empty() {
                break;
            }
            cursor = batch.last().map(|p| p.id);

            for mut post in batch {
                if !self.metrics.recompute_evergreen(&mut post) {
                    continue;
                }
                if let Err(e) = self.metrics.save(&post).await {
                    tracing::warn!(post_id = %post.id, error = %e, "evergreen sweep: save failed, skipping");
                }
            }
        }
    }

    pub async fn run_rising_decay_worker(self: std::sync::Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
        loop {
            interval.tick().await;
            self.run_rising_decay_sweep().await;
        }
    }

    pub async fn run_evergreen_worker(self: std::sync::Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.evergreen_sweep_interval_secs));
        loop {
            interval.tick().await;
            self.run_evergreen_sweep().await;
        }
    }
}
