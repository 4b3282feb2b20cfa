//! Scoring primitives (C1): decay, EMA update, Bayesian prior count, half-life
//! math. Pure functions only — no I/O, no clock reads beyond what callers pass
//! in, so these are trivially unit-testable and reusable from every service.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmaMode {
    Session,
    Db,
}

/// `oldScore * exp(-lambda * deltaDays)`, `lambda = ln2 / halfLifeDays`.
pub fn decayed_score(old_score: f64, last_updated: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    if old_score == 0.0 {
        return 0.0;
    }
    let delta_days = (now - last_updated).num_milliseconds() as f64 / 86_400_000.0;
    let lambda = std::f64::consts::LN_2 / half_life_days;
    old_score * (-lambda * delta_days).exp()
}

/// `alpha * newScore + (1 - alpha) * decayedScore(oldScore, lastUpdated)`.
/// When `oldScore == 0` the decayed term is bypassed: `emaUpdate(0, _, new, _) == alpha*new`.
pub fn ema_update(
    old_score: f64,
    last_updated: DateTime<Utc>,
    new_score: f64,
    now: DateTime<Utc>,
    mode: EmaMode,
    half_life_days: f64,
    alpha_session: f64,
    alpha_db: f64,
) -> f64 {
    let alpha = match mode {
        EmaMode::Session => alpha_session,
        EmaMode::Db => alpha_db,
    };
    let decayed = if old_score == 0.0 {
        0.0
    } else {
        decayed_score(old_score, last_updated, now, half_life_days)
    };
    alpha * new_score + (1.0 - alpha) * decayed
}

/// `clamp(floor(20 * log10(impr + 1)), min, max)`; `min` when `impr <= 0`.
pub fn choose_prior_count(global_impressions: i64, min: f64, max: f64) -> f64 {
    if global_impressions <= 0 {
        return min;
    }
    let raw = (20.0 * ((global_impressions as f64) + 1.0).log10()).floor();
    raw.clamp(min, max)
}

/// `(1 - alpha) * old + alpha * session`; used exclusively for merge-back.
pub fn ema_blend(alpha: f64, old: f64, session: f64) -> f64 {
    (1.0 - alpha) * old + alpha * session
}

/// `oldAvg = totalEngagement / impressionCount`, or 0 when nothing has landed yet.
pub fn safe_average(total_engagement: f64, impression_count: i64) -> f64 {
    if impression_count > 0 {
        total_engagement / impression_count as f64
    } else {
        0.0
    }
}

/// Bayesian smoothing of a per-user average against a global prior.
pub fn bayesian_smooth(global_avg: f64, prior_count: f64, user_total: f64, user_impressions: i64) -> f64 {
    (global_avg * prior_count + user_total) / (prior_count + user_impressions as f64)
}

/// `exp(-ln2/halfLifeDays * ageDays)`, used by post metrics and feed scoring alike.
pub fn time_decay(age_ms: i64, half_life_days: f64) -> f64 {
    let age_days = age_ms as f64 / 86_400_000.0;
    let lambda = std::f64::consts::LN_2 / half_life_days;
    (-lambda * age_days).exp()
}

/// Post metrics' short/long velocity EMAs: unlike `ema_update`, alpha itself
/// is a function of elapsed time, `alpha = 1 - exp(-lambda * deltaMs)` with
/// `lambda = ln2 / halfLifeMs`, so two engagements ten seconds apart barely
/// move the estimate while two a day apart nearly replace it outright.
pub fn velocity_ema_update(old: f64, delta_ms: i64, weight: f64, half_life_ms: f64) -> f64 {
    let lambda = std::f64::consts::LN_2 / half_life_ms;
    let alpha = 1.0 - (-lambda * delta_ms.max(0) as f64).exp();
    old * (1.0 - alpha) + weight * alpha
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn decayed_score_is_zero_for_uninitialized_node() {
        assert_eq!(decayed_score(0.0, now(), now(), 0.5), 0.0);
    }

    #[test]
    fn decayed_score_halves_after_one_half_life() {
        let then = now();
        let later = then + Duration::hours(12); // HALF_LIFE_DAYS=0.5 == 12h
        let d = decayed_score(10.0, then, later, 0.5);
        assert!((d - 5.0).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn ema_update_bypasses_decay_when_old_is_zero() {
        let v = ema_update(0.0, now(), 8.0, now(), EmaMode::Session, 0.5, 0.7, 0.25);
        assert!((v - 0.7 * 8.0).abs() < 1e-9);
    }

    #[test]
    fn choose_prior_count_monotonic_and_clamped() {
        assert_eq!(choose_prior_count(0, 20.0, 500.0), 20.0);
        assert_eq!(choose_prior_count(-5, 20.0, 500.0), 20.0);
        let a = choose_prior_count(10, 20.0, 500.0);
        let b = choose_prior_count(10_000, 20.0, 500.0);
        assert!(b >= a);
        assert!(b <= 500.0);
        assert!(a >= 20.0);
    }

    #[test]
    fn ema_blend_identity_on_equal_inputs() {
        for alpha in [0.0, 0.25, 0.5, 1.0] {
            assert!((ema_blend(alpha, 3.0, 3.0) - 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn safe_average_zero_denominator_yields_zero() {
        assert_eq!(safe_average(100.0, 0), 0.0);
    }

    #[test]
    fn velocity_ema_update_barely_moves_on_a_tiny_delta() {
        let v = velocity_ema_update(1.0, 1, 10.0, 3_600_000.0);
        assert!((v - 1.0).abs() < 1e-3);
    }

    #[test]
    fn velocity_ema_update_nearly_replaces_after_many_half_lives() {
        let v = velocity_ema_update(1.0, 36_000_000, 10.0, 3_600_000.0);
        assert!((v - 10.0).abs() < 1e-2);
    }
}
