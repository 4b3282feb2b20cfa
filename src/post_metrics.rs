//! Per-post metrics (C7): short/long velocity EMAs over a bounded
//! rising-window ring buffer, a trending score blending burst ratio against
//! raw activity, the `isRising`/`isEvergreen` flags, and a Bayesian-smoothed
//! score whose prior strength — borrowed from the post's creator and
//! category track record — decays with the post's own age. A brand-new post
//! from a reliable creator starts out riding mostly on the creator's track
//! record; as the post accumulates its own impressions that prior fades out.

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{EntityType, Post, WindowEvent};
use crate::posts_store::PostsStore;
use crate::profile_store::ProfileStore;
use crate::scoring::{bayesian_smooth, choose_prior_count, safe_average, time_decay, velocity_ema_update};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

const TRENDING_EPSILON: f64 = 1e-6;

#[derive(Clone)]
pub struct PostMetricsEngine {
    posts: PostsStore,
    profile_store: ProfileStore,
    config: Config,
    /// Rising-window ring buffers keyed by post id. Request-path writes here
    /// are best-effort between hourly aggregator flushes: this cache is
    /// not persisted, so a restart just starts every post's window fresh.
    windows: Arc<DashMap<Uuid, Vec<WindowEvent>>>,
}

impl PostMetricsEngine {
    pub fn new(posts: PostsStore, profile_store: ProfileStore, config: Config) -> Self {
        Self { posts, profile_store, config, windows: Arc::new(DashMap::new()) }
    }

    /// Loads the post, applies one engagement, and writes it back — the
    /// convenience entry point used by the engagement controller and the
    /// hourly aggregator, which only need to hand over a post id and a
    /// weight/delta and don't want to manage the window cache themselves.
    pub async fn apply_engagement(&self, post_id: Uuid, weight: f64) -> AppResult<Option<Post>> {
        let Some(mut post) = self.posts.load(post_id).await? else {
            return Ok(None);
        };
        let mut window = self.windows.remove(&post_id).map(|(_, w)| w).unwrap_or_default();
        self.record_engagement(&mut post, &mut window, weight).await?;
        self.windows.insert(post_id, window);
        Ok(Some(post))
    }

    /// Applies one engagement delta to a post's metrics and persists the
    /// updated row. `window` is the rising-window ring buffer for this post,
    /// freshly reloaded by the caller from wherever it keeps it (an
    /// in-process cache keyed by post id — metrics recompute is frequent
    /// enough that round-tripping the whole window through Postgres on every
    /// event would be wasteful).
    pub async fn record_engagement(
        &self,
        post: &mut Post,
        window: &mut Vec<WindowEvent>,
        weight: f64,
    ) -> AppResult<()> {
        let now = Utc::now();
        let is_first_batch = post.last_trending_update == post.created_at;

        post.impression_count += 1;
        post.engagement_sum += weight;
        post.raw_score = safe_average(post.engagement_sum, post.impression_count);

        let cutoff = now - chrono::Duration::milliseconds(self.config.rising_window_ms);
        window.retain(|e| e.ts >= cutoff);
        window.push(WindowEvent { ts: now, weight });
        if window.len() > self.config.rising_window_cap {
            let excess = window.len() - self.config.rising_window_cap;
            window.drain(0..excess);
        }

        let delta_ms = (now - post.last_trending_update).num_milliseconds().max(0);
        post.short_term_velocity_ema =
            velocity_ema_update(post.short_term_velocity_ema, delta_ms, weight, self.config.short_half_life_ms);
        post.historical_velocity_ema =
            velocity_ema_update(post.historical_velocity_ema, delta_ms, weight, self.config.long_half_life_ms);

        let ratio = post.short_term_velocity_ema / (post.historical_velocity_ema + TRENDING_EPSILON);
        let ratio_score = self.config.trending_weight * ratio.powf(self.config.trending_exponent);
        let norm_activity = (post.short_term_velocity_ema / self.config.trending_activity_normalizer).min(1.0);
        let burst_score = self.config.trending_weight * self.config.trending_burst_factor * norm_activity;
        post.trending_score = ratio_score + burst_score;

        post.is_rising = if is_first_batch {
            weight >= self.config.min_initial_rising_weight
        } else {
            ratio >= self.config.rising_rate_multiplier
        };

        self.profile_store.ensure_global_stats_row(EntityType::Category, &post.category).await?;
        self.profile_store.ensure_creator_stats_row(post.creator).await?;
        let cat_stats = self.profile_store.get_global_stats(EntityType::Category, &post.category).await?;
        let creator_stats = self.profile_store.get_creator_stats(post.creator).await?;
        let cat_avg = cat_stats.average();
        let creator_avg = if creator_stats.impression_count > 0 { creator_stats.average() } else { cat_avg };
        let prior_mean = self.config.prior_creator_weight * creator_avg + (1.0 - self.config.prior_creator_weight) * cat_avg;

        let init_prior = choose_prior_count(post.impression_count, self.config.prior_count_min, self.config.prior_count_max);
        let age_ms = (now - post.created_at).num_milliseconds().max(0);
        let prior_half_life_ms = self.config.prior_half_life_hours * 3_600_000.0;
        let decayed_prior = (init_prior * time_decay(age_ms, prior_half_life_ms / 86_400_000.0)).max(self.config.prior_min_count);

        post.bayesian_score = bayesian_smooth(prior_mean, decayed_prior, post.engagement_sum, post.impression_count)
            * time_decay(age_ms, self.config.half_life_days);

        post.cumulative_score += weight;
        post.last_trending_update = now;
        post.last_score_update = now;

        self.posts.save_metrics(post).await
    }

    /// Evergreen recompute (C11, every 2 hours): posts with a raw score
    /// clearing the floor earn the flag once their short-term velocity has
    /// fallen far below the historical baseline; newly-evergreen posts force
    /// `isRising` off.
    pub fn recompute_evergreen(&self, post: &mut Post) -> bool {
        if post.raw_score < self.config.min_raw_for_evergreen {
            return false;
        }
        let ratio = post.short_term_velocity_ema / (post.historical_velocity_ema + TRENDING_EPSILON);
        let should_be_evergreen = ratio < 0.01;
        let changed = should_be_evergreen != post.is_evergreen;
        post.is_evergreen = should_be_evergreen;
        if changed && should_be_evergreen {
            post.is_rising = false;
        }
        changed
    }

    pub async fn save(&self, post: &Post) -> AppResult<()> {
        self.posts.save_metrics(post).await
    }

    pub async fn load(&self, post_id: Uuid) -> AppResult<Option<Post>> {
        self.posts.load(post_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PostMetricsEngine {
        PostMetricsEngine::new(
            PostsStore::new(sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://test@localhost/test").unwrap()),
            ProfileStore::new_unconnected_for_test(),
            Config::from_defaults_for_test(),
        )
    }

    fn sample_post() -> Post {
        let now = Utc::now();
        Post {
            id: Uuid::new_v4(),
            creator: Uuid::new_v4(),
            category: "tech".to_string(),
            sub_category: None,
            specific: None,
            impression_count: 0,
            engagement_sum: 0.0,
            raw_score: 0.0,
            trending_score: 0.0,
            short_term_velocity_ema: 0.0,
            historical_velocity_ema: 0.0,
            bayesian_score: 0.0,
            cumulative_score: 0.0,
            is_evergreen: false,
            is_rising: false,
            created_at: now,
            last_trending_update: now,
            last_score_update: now,
        }
    }

    #[test]
    fn evergreen_requires_raw_score_floor() {
        let engine = engine();
        let mut post = sample_post();
        post.raw_score = 5.0;
        post.short_term_velocity_ema = 0.0001;
        post.historical_velocity_ema = 1.0;
        assert!(!engine.recompute_evergreen(&mut post));
        assert!(!post.is_evergreen);
    }

    #[test]
    fn evergreen_forces_rising_off_when_newly_set() {
        let engine = engine();
        let mut post = sample_post();
        post.raw_score = 2000.0;
        post.is_rising = true;
        post.short_term_velocity_ema = 0.001;
        post.historical_velocity_ema = 1.0;
        engine.recompute_evergreen(&mut post);
        assert!(post.is_evergreen);
        assert!(!post.is_rising);
    }

    #[test]
    fn first_batch_weight_below_threshold_does_not_flag_rising() {
        assert!(3.0 < Config::from_defaults_for_test().min_initial_rising_weight);
    }
}
