//! Post persistence shared by the post metrics engine and the engagement
//! stats consumer — they touch disjoint columns on the same row (impression
//! and engagement counters vs. trending/velocity/Bayesian fields) so both
//! go through this one store.

use crate::error::AppResult;
use crate::models::Post;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PostsStore {
    pool: PgPool,
}

impl PostsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, post_id: Uuid) -> AppResult<Option<Post>> {
        let row: Option<Post> = sqlx::query_as("SELECT * FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Full-row write-back used by the post metrics engine after recomputing
    /// trending/velocity/Bayesian fields.
    pub async fn save_metrics(&self, post: &Post) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE posts SET
                impression_count = $2,
                engagement_sum = $3,
                raw_score = $4,
                trending_score = $5,
                short_term_velocity_ema = $6,
                historical_velocity_ema = $7,
                bayesian_score = $8,
                cumulative_score = $9,
                is_evergreen = $10,
                is_rising = $11,
                last_trending_update = $12,
                last_score_update = $13
            WHERE id = $1
            "#,
        )
        .bind(post.id)
        .bind(post.impression_count)
        .bind(post.engagement_sum)
        .bind(post.raw_score)
        .bind(post.trending_score)
        .bind(post.short_term_velocity_ema)
        .bind(post.historical_velocity_ema)
        .bind(post.bayesian_score)
        .bind(post.cumulative_score)
        .bind(post.is_evergreen)
        .bind(post.is_rising)
        .bind(post.last_trending_update)
        .bind(post.last_score_update)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic `$inc` used by the engagement stats consumer — ordering
    /// against concurrent engagements on the same post is not observable.
    pub async fn incr_counters(&self, post_id: Uuid, engagement_score: f64) -> AppResult<()> {
        sqlx::query(
            "UPDATE posts SET impression_count = impression_count + 1, engagement_sum = engagement_sum + $2 WHERE id = $1",
        )
        .bind(post_id)
        .bind(engagement_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---------------- Candidate sourcing for feed assembly ----------------

    pub async fn find_by_category(&self, category: &str, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as(
            "SELECT * FROM posts WHERE category = $1 ORDER BY bayesian_score DESC, created_at DESC LIMIT $2",
        )
        .bind(category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_by_sub_category(&self, category: &str, sub_category: &str, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as(
            "SELECT * FROM posts WHERE category = $1 AND sub_category = $2 ORDER BY bayesian_score DESC, created_at DESC LIMIT $3",
        )
        .bind(category)
        .bind(sub_category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_by_creator(&self, creator_id: Uuid, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as(
            "SELECT * FROM posts WHERE creator = $1 ORDER BY trending_score DESC LIMIT $2",
        )
        .bind(creator_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// General `TRENDING` pool: non-evergreen posts by trending score,
    /// independent of `isRising` — a post can be trending without (yet)
    /// clearing the rising bar, and vice versa.
    pub async fn find_trending(&self, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as(
            "SELECT * FROM posts WHERE is_evergreen = false ORDER BY trending_score DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// General `RISING` pool: distinct from `TRENDING` — flagged
    /// rising AND not evergreen.
    pub async fn find_rising(&self, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as(
            "SELECT * FROM posts WHERE is_rising = true AND is_evergreen = false ORDER BY trending_score DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_recent(&self, since: DateTime<Utc>, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as(
            "SELECT * FROM posts WHERE created_at >= $1 ORDER BY bayesian_score DESC LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_evergreen(&self, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as(
            "SELECT * FROM posts WHERE is_evergreen = true ORDER BY trending_score DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Batch scan used by the scheduled jobs (rising decay, evergreen
    /// recompute) — ordered by id so repeated calls with increasing
    /// `after` cover the table without re-visiting rows.
    pub async fn scan_after(&self, after: Option<Uuid>, limit: i64) -> AppResult<Vec<Post>> {
        let rows = match after {
            Some(cursor) => {
                sqlx::query_as("SELECT * FROM posts WHERE id > $1 ORDER BY id LIMIT $2")
                    .bind(cursor)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM posts ORDER BY id LIMIT $1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    /// A random low-signal sample for the explore bucket — deliberately
    /// outside the scoring cascade above.
    pub async fn find_explore_sample(&self, limit: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query_as("SELECT * FROM posts ORDER BY RANDOM() LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
impl PostsStore {
    /// A lazily-connecting pool for unit tests that never actually issue a query.
    pub fn new_unconnected_for_test() -> Self {
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://test@localhost/test").expect("lazy pool");
        Self { pool }
    }
}
