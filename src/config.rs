use std::env;

/// All tunables named in the scoring/feed design, collected in one place so
/// they can be overridden per-deployment without a code change.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,

    // Scoring primitives (C1)
    pub half_life_days: f64,
    pub short_half_life_ms: f64,
    pub long_half_life_ms: f64,
    pub ema_alpha_session: f64,
    pub ema_alpha_db: f64,
    pub session_blend_alpha: f64,
    pub prior_count_min: f64,
    pub prior_count_max: f64,

    // Pool caps
    pub top_cat_max: usize,
    pub rising_cat_max: usize,
    pub top_sub_max: usize,
    pub rising_sub_max: usize,
    pub specific_max: usize,
    pub top_creator_max: usize,
    pub rising_creator_max: usize,

    // Creator state machine
    pub harskip_threshold: u32,
    pub reentry_delay_ms: i64,
    pub skip_weight: f64,
    pub watched_threshold: u32,

    // Post metrics
    pub rising_window_ms: i64,
    pub rising_window_cap: usize,
    pub min_initial_rising_weight: f64,
    pub rising_rate_multiplier: f64,
    pub trending_weight: f64,
    pub trending_exponent: f64,
    pub trending_activity_normalizer: f64,
    pub trending_burst_factor: f64,
    pub prior_creator_weight: f64,
    pub prior_min_count: f64,
    pub prior_half_life_hours: f64,
    pub min_raw_for_evergreen: f64,

    // Session lifecycle
    pub session_ttl_seconds: i64,
    pub expiry_sweep_interval_secs: u64,

    // Feed assembler
    pub feed_size: usize,
    pub non_explore_slots: usize,
    pub recent_window_ms: i64,
    pub personal_weight: f64,
    pub interest_weight: f64,
    pub creator_weight: f64,
    pub raw_weight: f64,
    pub trend_weight: f64,
    pub bayesian_weight: f64,

    // Feed interleave per-bucket caps
    pub cap_skip_reentry: usize,
    pub cap_watched: usize,
    pub cap_cat: usize,
    pub cap_creator: usize,
    pub cap_creator_followed: usize,
    pub cap_trending: usize,
    pub cap_rising: usize,
    pub cap_recent: usize,
    pub cap_evergreen: usize,
    pub cap_unknown: usize,

    // Scheduled jobs (C11)
    pub rising_decay_factor: f64,
    pub evergreen_sweep_interval_secs: u64,

    // Event pipeline (C8)
    pub hourly_aggregator_interval_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 3000),
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            half_life_days: env_or("HALF_LIFE_DAYS", 0.5),
            short_half_life_ms: env_or("SHORT_HALF_LIFE_MS", 3_600_000.0),
            long_half_life_ms: env_or("LONG_HALF_LIFE_MS", 86_400_000.0),
            ema_alpha_session: env_or("EMA_ALPHA_SESSION", 0.7),
            ema_alpha_db: env_or("EMA_ALPHA_DB", 0.25),
            session_blend_alpha: env_or("SESSION_BLEND_ALPHA", 0.25),
            prior_count_min: env_or("PRIOR_COUNT_MIN", 20.0),
            prior_count_max: env_or("PRIOR_COUNT_MAX", 500.0),

            top_cat_max: env_or("TOP_CAT_MAX", 20),
            rising_cat_max: env_or("RISING_CAT_MAX", 12),
            top_sub_max: env_or("TOP_SUB_MAX", 6),
            rising_sub_max: env_or("RISING_SUB_MAX", 4),
            specific_max: env_or("SPECIFIC_MAX", 2),
            top_creator_max: env_or("TOP_CREATOR_MAX", 50),
            rising_creator_max: env_or("RISING_CREATOR_MAX", 25),

            harskip_threshold: env_or("HARSKIP_THRESHOLD", 10),
            reentry_delay_ms: env_or("REENTRY_DELAY_MS", 604_800_000),
            skip_weight: env_or("SKIP_WEIGHT", -1.5),
            watched_threshold: env_or("WATCHED_THRESHOLD", 2),

            rising_window_ms: env_or("RISING_WINDOW_MS", 3_600_000),
            rising_window_cap: env_or("RISING_WINDOW_CAP", 200),
            min_initial_rising_weight: env_or("MIN_INITIAL_RISING_WEIGHT", 10.0),
            rising_rate_multiplier: env_or("RISING_RATE_MULTIPLIER", 2.0),
            trending_weight: env_or("TRENDING_WEIGHT", 1.0),
            trending_exponent: env_or("TRENDING_EXPONENT", 1.5),
            trending_activity_normalizer: env_or("TRENDING_ACTIVITY_NORMALIZER", 10.0),
            trending_burst_factor: env_or("TRENDING_BURST_FACTOR", 0.5),
            prior_creator_weight: env_or("PRIOR_CREATOR_WEIGHT", 0.4),
            prior_min_count: env_or("PRIOR_MIN_COUNT", 1.0),
            prior_half_life_hours: env_or("PRIOR_HALF_LIFE_HOURS", 2.0),
            min_raw_for_evergreen: env_or("MIN_RAW_FOR_EVERGREEN", 1000.0),

            session_ttl_seconds: env_or("SESSION_TTL_SECONDS", 600),
            expiry_sweep_interval_secs: env_or("EXPIRY_SWEEP_INTERVAL_SECS", 60),

            feed_size: env_or("FEED_SIZE", 20),
            non_explore_slots: env_or("NON_EXPLORE", 15),
            recent_window_ms: env_or("RECENT_WINDOW_MS", 3_600_000),
            personal_weight: env_or("PERSONAL_WEIGHT", 0.5),
            interest_weight: env_or("INTEREST_WEIGHT", 0.7),
            creator_weight: env_or("CREATOR_WEIGHT", 0.3),
            raw_weight: env_or("RAW_WEIGHT", 0.25),
            trend_weight: env_or("TREND_WEIGHT", 0.25),
            bayesian_weight: env_or("BAYESIAN_WEIGHT", 0.15),

            cap_skip_reentry: env_or("CAP_SKIP_REENTRY", 1),
            cap_watched: env_or("CAP_WATCHED", 1),
            cap_cat: env_or("CAP_CAT", 3),
            cap_creator: env_or("CAP_CREATOR", 2),
            cap_creator_followed: env_or("CAP_CREATOR_FOLLOWED", 2),
            cap_trending: env_or("CAP_TRENDING", 2),
            cap_rising: env_or("CAP_RISING", 1),
            cap_recent: env_or("CAP_RECENT", 1),
            cap_evergreen: env_or("CAP_EVERGREEN", 1),
            cap_unknown: env_or("CAP_UNKNOWN", 1),

            rising_decay_factor: env_or("DECAY_FACTOR", 0.9),
            evergreen_sweep_interval_secs: env_or("EVERGREEN_SWEEP_INTERVAL_SECS", 2 * 3600),

            hourly_aggregator_interval_secs: env_or("HOURLY_AGGREGATOR_INTERVAL_SECS", 3600),
        }
    }
}

#[cfg(test)]
impl Config {
    /// Hardcoded defaults for unit tests that need a `Config` but must not
    /// touch the environment or a real database/Redis instance.
    pub fn from_defaults_for_test() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_url: "postgres://test".to_string(),
            redis_url: "redis://test".to_string(),
            half_life_days: 0.5,
            short_half_life_ms: 3_600_000.0,
            long_half_life_ms: 86_400_000.0,
            ema_alpha_session: 0.7,
            ema_alpha_db: 0.25,
            session_blend_alpha: 0.25,
            prior_count_min: 20.0,
            prior_count_max: 500.0,
            top_cat_max: 20,
            rising_cat_max: 12,
            top_sub_max: 6,
            rising_sub_max: 4,
            specific_max: 2,
            top_creator_max: 50,
            rising_creator_max: 25,
            harskip_threshold: 10,
            reentry_delay_ms: 604_800_000,
            skip_weight: -1.5,
            watched_threshold: 2,
            rising_window_ms: 3_600_000,
            rising_window_cap: 200,
            min_initial_rising_weight: 10.0,
            rising_rate_multiplier: 2.0,
            trending_weight: 1.0,
            trending_exponent: 1.5,
            trending_activity_normalizer: 10.0,
            trending_burst_factor: 0.5,
            prior_creator_weight: 0.4,
            prior_min_count: 1.0,
            prior_half_life_hours: 2.0,
            min_raw_for_evergreen: 1000.0,
            session_ttl_seconds: 600,
            expiry_sweep_interval_secs: 60,
            feed_size: 20,
            non_explore_slots: 15,
            recent_window_ms: 3_600_000,
            personal_weight: 0.5,
            interest_weight: 0.7,
            creator_weight: 0.3,
            raw_weight: 0.25,
            trend_weight: 0.25,
            bayesian_weight: 0.15,
            cap_skip_reentry: 1,
            cap_watched: 1,
            cap_cat: 3,
            cap_creator: 2,
            cap_creator_followed: 2,
            cap_trending: 2,
            cap_rising: 1,
            cap_recent: 1,
            cap_evergreen: 1,
            cap_unknown: 1,
            rising_decay_factor: 0.9,
            evergreen_sweep_interval_secs: 2 * 3600,
            hourly_aggregator_interval_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default_on_missing_var() {
        let v: u32 = env_or("FEEDCORE_DEFINITELY_UNSET_VAR", 42);
        assert_eq!(v, 42);
    }
}
