//! Profile store (C3): persistent user profile load/save plus the
//! global/creator/user-interest stat counters (`GlobalStats`,
//! `UserInterestStats`, `CreatorStats`).
//!
//! Queries are written with `sqlx::query_as` against runtime SQL strings
//! rather than the `query!` macro — it keeps the statement text free of a
//! compile-time schema dependency while still going through `sqlx`'s row
//! mapping.

use crate::error::AppResult;
use crate::models::{EntityType, StatCounters, UserProfile};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct ProfileStore {
    pool: PgPool,
}

impl ProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads the persistent profile, creating an empty one if this is the
    /// user's first appearance (profile creation itself happens at signup,
    /// an external collaborator; this is the lazy fallback for data that
    /// predates that flow or was never backfilled).
    pub async fn load_or_create(&self, user_id: Uuid) -> AppResult<UserProfile> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT profile FROM user_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((profile,)) => {
                let mut parsed: UserProfile =
                    serde_json::from_value(profile).unwrap_or_else(|_| UserProfile::new(user_id));
                parsed.user_id = user_id;
                Ok(parsed)
            }
            None => {
                let fresh = UserProfile::new(user_id);
                self.save(&fresh).await?;
                Ok(fresh)
            }
        }
    }

    /// Saves the whole profile document. The persistent write path skips the
    /// session path's defensive re-validation — the document came straight
    /// out of `UserProfile`, not off the wire.
    pub async fn save(&self, profile: &UserProfile) -> AppResult<()> {
        let json = serde_json::to_value(profile).expect("UserProfile always serializes");
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, profile, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET profile = $2, updated_at = NOW()
            "#,
        )
        .bind(profile.user_id)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic `impressionCount += 1, totalEngagement += engagementScore` on
    /// `GlobalStats{entityType,name}`, returning the post-increment row.
    pub async fn incr_global_stats(
        &self,
        entity_type: EntityType,
        name: &str,
        engagement_score: f64,
    ) -> AppResult<StatCounters> {
        let row: StatCounters = sqlx::query_as(
            r#"
            INSERT INTO global_stats (entity_type, name, impression_count, total_engagement)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (entity_type, name)
            DO UPDATE SET
                impression_count = global_stats.impression_count + 1,
                total_engagement = global_stats.total_engagement + $3
            RETURNING impression_count, total_engagement
            "#,
        )
        .bind(entity_type.as_str())
        .bind(name)
        .bind(engagement_score)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_global_stats(&self, entity_type: EntityType, name: &str) -> AppResult<StatCounters> {
        let row: Option<StatCounters> = sqlx::query_as(
            "SELECT impression_count, total_engagement FROM global_stats WHERE entity_type = $1 AND name = $2",
        )
        .bind(entity_type.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_default())
    }

    pub async fn incr_user_interest_stats(
        &self,
        user_id: Uuid,
        entity_type: EntityType,
        name: &str,
        engagement_score: f64,
    ) -> AppResult<StatCounters> {
        let row: StatCounters = sqlx::query_as(
            r#"
            INSERT INTO user_interest_stats (user_id, entity_type, name, impression_count, total_engagement)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (user_id, entity_type, name)
            DO UPDATE SET
                impression_count = user_interest_stats.impression_count + 1,
                total_engagement = user_interest_stats.total_engagement + $4
            RETURNING impression_count, total_engagement
            "#,
        )
        .bind(user_id)
        .bind(entity_type.as_str())
        .bind(name)
        .bind(engagement_score)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user_interest_stats(
        &self,
        user_id: Uuid,
        entity_type: EntityType,
        name: &str,
    ) -> AppResult<StatCounters> {
        let row: Option<StatCounters> = sqlx::query_as(
            r#"
            SELECT impression_count, total_engagement FROM user_interest_stats
            WHERE user_id = $1 AND entity_type = $2 AND name = $3
            "#,
        )
        .bind(user_id)
        .bind(entity_type.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_default())
    }

    pub async fn incr_creator_stats(&self, creator_id: Uuid, engagement_score: f64) -> AppResult<StatCounters> {
        let row: StatCounters = sqlx::query_as(
            r#"
            INSERT INTO creator_stats (creator_id, impression_count, total_engagement)
            VALUES ($1, 1, $2)
            ON CONFLICT (creator_id)
            DO UPDATE SET
                impression_count = creator_stats.impression_count + 1,
                total_engagement = creator_stats.total_engagement + $2
            RETURNING impression_count, total_engagement
            "#,
        )
        .bind(creator_id)
        .bind(engagement_score)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_creator_stats(&self, creator_id: Uuid) -> AppResult<StatCounters> {
        let row: Option<StatCounters> =
            sqlx::query_as("SELECT impression_count, total_engagement FROM creator_stats WHERE creator_id = $1")
                .bind(creator_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.unwrap_or_default())
    }

    /// Init-only upsert used by the post metrics engine — does not touch
    /// counters, just ensures a row exists so the engine can read
    /// `impressionCount=0` rather than handling a missing row specially.
    pub async fn ensure_global_stats_row(&self, entity_type: EntityType, name: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO global_stats (entity_type, name, impression_count, total_engagement)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (entity_type, name) DO NOTHING
            "#,
        )
        .bind(entity_type.as_str())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ensure_creator_stats_row(&self, creator_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO creator_stats (creator_id, impression_count, total_engagement) VALUES ($1, 0, 0) ON CONFLICT (creator_id) DO NOTHING",
        )
        .bind(creator_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Batch scan over every persistent profile, ordered by `user_id` so
    /// repeated calls with an advancing cursor cover the table exactly once.
    /// Used by the daily rising-decay sweep, which must visit every user's
    /// rising pools rather than the posts table.
    pub async fn scan_users_after(&self, after: Option<Uuid>, limit: i64) -> AppResult<Vec<UserProfile>> {
        let rows: Vec<(Uuid, serde_json::Value)> = match after {
            Some(cursor) => {
                sqlx::query_as("SELECT user_id, profile FROM user_profiles WHERE user_id > $1 ORDER BY user_id LIMIT $2")
                    .bind(cursor)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT user_id, profile FROM user_profiles ORDER BY user_id LIMIT $1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(user_id, profile)| {
                let mut parsed: UserProfile = serde_json::from_value(profile).unwrap_or_else(|_| UserProfile::new(user_id));
                parsed.user_id = user_id;
                parsed
            })
            .collect())
    }
}

#[cfg(test)]
impl ProfileStore {
    /// A lazily-connecting pool for unit tests that exercise session-mode
    /// code paths only and never actually issue a query.
    pub fn new_unconnected_for_test() -> Self {
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://test@localhost/test").expect("lazy pool");
        Self { pool }
    }
}
