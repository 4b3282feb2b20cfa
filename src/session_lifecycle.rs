//! Session blob lifecycle: start hydrates a fresh working copy of a user's
//! profile into the fast store, refresh just bumps the idle clock, and
//! merge-back folds whatever the session accumulated back into the
//! persistent profile and tears the blob down. The expiry worker is just
//! merge-back run unattended against every session whose idle clock has run
//! out, one session at a time, with per-session fault isolation so one
//! corrupt blob doesn't stall the sweep.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{CategoryNode, CreatorNode, FollowedCreator, SessionBlob, SkippedEntry, SpecificNode, SubNode, UserProfile, WatchedEntry};
use crate::pools::{find_or_init, insert_into_pools};
use crate::profile_store::ProfileStore;
use crate::redis_client::FastStore;
use crate::scoring::ema_blend;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Priority order for the creator signal aggregation at merge-back: the highest-priority
/// pool a creator appears in within the session blob wins, first-wins by
/// priority rather than by scan order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SignalPriority {
    Skipped = 0,
    Watched = 1,
    Positive = 2,
    Followed = 3,
}

struct CreatorSignal {
    priority: SignalPriority,
    score: f64,
    skips: u32,
}

#[derive(Clone)]
pub struct SessionLifecycle {
    fast_store: FastStore,
    profile_store: ProfileStore,
    config: Config,
    /// Per-session-id sharded lock: a session's read-modify-write
    /// cycle (hydrate → mutate → persist) must be serialized so two
    /// concurrent requests against the same `sid` don't clobber each other's
    /// write. Entries are never removed — session ids are one-shot uuids, so
    /// the map just grows with live sessions rather than thrashing.
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLifecycle {
    pub fn new(fast_store: FastStore, profile_store: ProfileStore, config: Config) -> Self {
        Self {
            fast_store,
            profile_store,
            config,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquires the per-session lock for the duration of a read-modify-write.
    /// Callers should hold the returned guard across `hydrate_working_profile`
    /// through `persist_working_profile` (or `merge_back`).
    pub async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub async fn start(&self, user_id: Uuid) -> AppResult<String> {
        let session_id = Uuid::new_v4().to_string();
        let profile = self.profile_store.load_or_create(user_id).await?;
        let blob = SessionBlob::from_profile(&profile);
        self.fast_store.set_session(&session_id, &blob).await?;
        self.fast_store.touch_last_access(&session_id, Utc::now().timestamp_millis()).await?;
        Ok(session_id)
    }

    pub async fn refresh(&self, session_id: &str) -> AppResult<()> {
        self.fast_store.touch_last_access(session_id, Utc::now().timestamp_millis()).await
    }

    /// Reconstructs a transient `UserProfile` from the session blob so the
    /// interest/creator services — which only know how to mutate a full
    /// profile — can be reused unmodified for session-mode scoring. Note
    /// this working copy starts with an empty `seen_posts`; impression
    /// dedup for feed assembly is tracked separately by the feed assembler,
    /// not through this round trip.
    pub async fn hydrate_working_profile(&self, session_id: &str) -> AppResult<Option<UserProfile>> {
        let Some(raw) = self.fast_store.get_session_raw(session_id).await? else {
            return Ok(None);
        };
        let blob: SessionBlob = serde_json::from_str(&raw).map_err(|_| AppError::CorruptSession)?;
        let mut profile = UserProfile::new(blob.user_id);
        blob.apply_to_profile(&mut profile);
        Ok(Some(profile))
    }

    pub async fn persist_working_profile(&self, session_id: &str, profile: &UserProfile) -> AppResult<()> {
        let blob = SessionBlob::from_profile(profile);
        self.fast_store.set_session(session_id, &blob).await
    }

    /// Folds a session's accumulated state back into the persistent profile
    /// and tears the blob down. A no-op (not an error) if the session is
    /// already gone — expiry races with an explicit merge-back are expected.
    /// Takes the per-session lock itself so it can't race a concurrent
    /// request-path read-modify-write against the same `sid`.
    pub async fn merge_back(&self, session_id: &str) -> AppResult<()> {
        let _guard = self.lock_session(session_id).await;
        let raw = self.fast_store.get_session_raw(session_id).await?;
        let Some(raw) = raw else { return Ok(()) };

        let blob: SessionBlob = match serde_json::from_str(&raw) {
            Ok(b) => b,
            Err(_) => {
                self.fast_store.delete_session(session_id).await?;
                self.fast_store.remove_last_access(session_id).await?;
                return Err(AppError::CorruptSession);
            }
        };

        let mut profile = self.profile_store.load_or_create(blob.user_id).await?;
        let alpha = self.config.session_blend_alpha;

        merge_category_pool(&mut profile.top_interests, &mut profile.rising_interests, &blob.top_categories, alpha, &self.config);
        merge_category_pool(&mut profile.top_interests, &mut profile.rising_interests, &blob.rising_categories, alpha, &self.config);

        merge_creators(&mut profile, &blob, alpha, &self.config);

        self.profile_store.save(&profile).await?;
        self.fast_store.delete_session(session_id).await?;
        self.fast_store.remove_last_access(session_id).await?;
        Ok(())
    }

    /// One sweep over every session idle longer than the configured TTL.
    /// Each merge-back failure is logged and skipped rather than aborting
    /// the whole sweep — an isolated corrupt blob shouldn't strand the rest
    /// of that tick's expired sessions.
    pub async fn sweep_expired(&self) -> AppResult<usize> {
        let cutoff = Utc::now().timestamp_millis() - self.config.session_ttl_seconds * 1000;
        let idle = self.fast_store.sessions_idle_before(cutoff).await?;
        let mut swept = 0;
        for session_id in idle {
            match self.merge_back(&session_id).await {
                Ok(()) => swept += 1,
                Err(e) => tracing::warn!(session_id = %session_id, error = %e, "merge-back failed during expiry sweep"),
            }
        }
        Ok(swept)
    }

    /// Runs `sweep_expired` on a fixed interval until the process exits.
    pub async fn run_expiry_worker(self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.expiry_sweep_interval_secs));
        loop {
            interval.tick().await;
            match self.sweep_expired().await {
                Ok(n) if n > 0 => tracing::info!(count = n, "swept expired sessions"),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
            }
        }
    }
}

fn merge_category_pool(primary: &mut Vec<CategoryNode>, secondary: &mut Vec<CategoryNode>, session_nodes: &[CategoryNode], alpha: f64, config: &Config) {
    for session_node in session_nodes {
        let mut existing = find_or_init(primary, secondary, &session_node.name.clone(), || CategoryNode {
            name: session_node.name.clone(),
            score: 0.0,
            last_updated: session_node.last_updated,
            top_subs: vec![],
            rising_subs: vec![],
        });
        existing.score = ema_blend(alpha, existing.score, session_node.score);
        existing.last_updated = session_node.last_updated;
        merge_sub_pool(&mut existing.top_subs, &mut existing.rising_subs, &session_node.top_subs, alpha, config);
        merge_sub_pool(&mut existing.top_subs, &mut existing.rising_subs, &session_node.rising_subs, alpha, config);
        insert_into_pools(primary, secondary, config.top_cat_max, config.rising_cat_max, existing);
    }
}

fn merge_sub_pool(primary: &mut Vec<SubNode>, secondary: &mut Vec<SubNode>, session_nodes: &[SubNode], alpha: f64, config: &Config) {
    for session_node in session_nodes {
        let mut existing = find_or_init(primary, secondary, &session_node.name.clone(), || SubNode {
            name: session_node.name.clone(),
            score: 0.0,
            last_updated: session_node.last_updated,
            specific: vec![],
        });
        existing.score = ema_blend(alpha, existing.score, session_node.score);
        existing.last_updated = session_node.last_updated;

        for spec in &session_node.specific {
            let mut current = existing
                .specific
                .iter()
                .find(|s| s.name == spec.name)
                .cloned()
                .unwrap_or(SpecificNode {
                    name: spec.name.clone(),
                    score: 0.0,
                    last_updated: spec.last_updated,
                });
            current.score = ema_blend(alpha, current.score, spec.score);
            current.last_updated = spec.last_updated;
            existing.specific.retain(|s| s.name != spec.name);
            existing.specific.push(current);
        }
        existing
            .specific
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        existing.specific.truncate(config.specific_max);

        insert_into_pools(primary, secondary, config.top_sub_max, config.rising_sub_max, existing);
    }
}

/// Finds the score/skip-count a creator currently holds in the persistent
/// profile, wherever it happens to live (at most one of the four places per
/// the five-state invariant).
fn lookup_old_creator_state(profile: &UserProfile, creator_id: Uuid) -> (f64, u32) {
    if let Some(f) = profile.following.iter().find(|f| f.user_id == creator_id) {
        return (f.score, f.skips);
    }
    if let Some(n) = profile
        .creators_interests
        .top_creators
        .iter()
        .chain(profile.creators_interests.rising_creators.iter())
        .find(|n| n.creator_id == creator_id)
    {
        return (n.score, n.skips);
    }
    if let Some(w) = profile.creators_interests.watched_creators_pool.iter().find(|w| w.creator_id == creator_id) {
        return (0.0, w.skips);
    }
    if let Some(s) = profile.creators_interests.skipped_creators_pool.iter().find(|s| s.creator_id == creator_id) {
        return (0.0, s.skips);
    }
    (0.0, 0)
}

fn remove_creator_everywhere(profile: &mut UserProfile, creator_id: Uuid) {
    profile.creators_interests.top_creators.retain(|n| n.creator_id != creator_id);
    profile.creators_interests.rising_creators.retain(|n| n.creator_id != creator_id);
    profile.creators_interests.watched_creators_pool.retain(|w| w.creator_id != creator_id);
    profile.creators_interests.skipped_creators_pool.retain(|s| s.creator_id != creator_id);
}

/// Creator merge-back: aggregate the session's signals into one priority map
/// (FOLLOWED > POSITIVE > WATCHED > SKIPPED, first-wins by priority), then for
/// each unique creator blend `newSkips = round(emaBlend(alpha, oldSkips,
/// sessionSkips))` and `newScore = emaBlend(alpha, oldScore, sessionScore)` and
/// apply the same five-state transition table as the live skip path uses,
/// with `newSkips` as the arbiter.
fn merge_creators(profile: &mut UserProfile, blob: &SessionBlob, alpha: f64, config: &Config) {
    let mut signals: HashMap<Uuid, CreatorSignal> = HashMap::new();
    let mut consider = |id: Uuid, priority: SignalPriority, score: f64, skips: u32| {
        signals
            .entry(id)
            .and_modify(|existing| {
                if priority > existing.priority {
                    existing.priority = priority;
                    existing.score = score;
                    existing.skips = skips;
                }
            })
            .or_insert(CreatorSignal { priority, score, skips });
    };

    for s in &blob.skipped_creators {
        consider(s.creator_id, SignalPriority::Skipped, 0.0, s.skips);
    }
    for w in &blob.watched_creators {
        consider(w.creator_id, SignalPriority::Watched, 0.0, w.skips);
    }
    for c in blob.top_creators.iter().chain(blob.rising_creators.iter()) {
        consider(c.creator_id, SignalPriority::Positive, c.score, c.skips);
    }
    for f in &blob.followed_creators {
        consider(f.user_id, SignalPriority::Followed, f.score, f.skips);
    }

    let now = Utc::now();
    let delay = Duration::milliseconds(config.reentry_delay_ms);

    for (creator_id, signal) in signals {
        let (old_score, old_skips) = lookup_old_creator_state(profile, creator_id);
        let new_skips = ema_blend(alpha, old_skips as f64, signal.skips as f64).round().max(0.0) as u32;
        let new_score = ema_blend(alpha, old_score, signal.score);

        if signal.priority == SignalPriority::Followed {
            remove_creator_everywhere(profile, creator_id);
            match profile.following.iter_mut().find(|f| f.user_id == creator_id) {
                Some(f) => {
                    f.score = new_score;
                    f.skips = new_skips;
                    f.last_updated = now;
                    if new_skips >= config.harskip_threshold {
                        f.score = 0.0;
                        f.reentry_at = Some(now + delay);
                    }
                }
                None => {
                    let hard_skipped = new_skips >= config.harskip_threshold;
                    profile.following.push(FollowedCreator {
                        user_id: creator_id,
                        score: if hard_skipped { 0.0 } else { new_score },
                        last_updated: now,
                        skips: new_skips,
                        last_skip_at: None,
                        reentry_at: if hard_skipped { Some(now + delay) } else { None },
                    });
                }
            }
            continue;
        }

        // Following eclipses any weaker session signal for the same creator.
        if profile.following.iter().any(|f| f.user_id == creator_id) {
            continue;
        }

        remove_creator_everywhere(profile, creator_id);
        if new_skips >= config.harskip_threshold {
            profile.creators_interests.skipped_creators_pool.push(SkippedEntry {
                creator_id,
                skips: config.harskip_threshold,
                last_skip_update: now,
                reentry_at: now + delay,
            });
        } else if new_skips >= config.watched_threshold {
            profile.creators_interests.watched_creators_pool.push(WatchedEntry {
                creator_id,
                skips: new_skips,
                last_skip_update: now,
                reentry_at: now,
            });
        } else {
            let node = CreatorNode {
                creator_id,
                score: new_score,
                last_updated: now,
                skips: new_skips,
                last_skip_at: None,
            };
            insert_into_pools(
                &mut profile.creators_interests.top_creators,
                &mut profile.creators_interests.rising_creators,
                config.top_creator_max,
                config.rising_creator_max,
                node,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_category_pool_blends_existing_and_session_scores() {
        let config = Config::from_defaults_for_test();
        let mut primary = vec![CategoryNode {
            name: "tech".to_string(),
            score: 4.0,
            last_updated: Utc::now(),
            top_subs: vec![],
            rising_subs: vec![],
        }];
        let mut secondary: Vec<CategoryNode> = vec![];
        let session_nodes = vec![CategoryNode {
            name: "tech".to_string(),
            score: 8.0,
            last_updated: Utc::now(),
            top_subs: vec![],
            rising_subs: vec![],
        }];

        merge_category_pool(&mut primary, &mut secondary, &session_nodes, 0.25, &config);

        let expected = ema_blend(0.25, 4.0, 8.0);
        assert!((primary[0].score - expected).abs() < 1e-9);
    }

    #[test]
    fn merge_creators_prefers_followed_signal_over_positive_for_same_creator() {
        let config = Config::from_defaults_for_test();
        let creator = Uuid::new_v4();
        let mut profile = UserProfile::new(Uuid::new_v4());

        let mut blob = SessionBlob {
            user_id: profile.user_id,
            ..Default::default()
        };
        blob.top_creators.push(CreatorNode {
            creator_id: creator,
            score: 5.0,
            last_updated: Utc::now(),
            skips: 1,
            last_skip_at: None,
        });
        blob.followed_creators.push(FollowedCreator {
            user_id: creator,
            score: 2.0,
            last_updated: Utc::now(),
            skips: 0,
            last_skip_at: None,
            reentry_at: None,
        });

        merge_creators(&mut profile, &blob, 0.25, &config);

        assert!(profile.following.iter().any(|f| f.user_id == creator));
        assert!(!profile.creators_interests.top_creators.iter().any(|n| n.creator_id == creator));
        assert!(!profile.creators_interests.rising_creators.iter().any(|n| n.creator_id == creator));
    }

    #[test]
    fn merge_creators_demotes_to_watched_once_new_skips_cross_watched_threshold() {
        let config = Config::from_defaults_for_test();
        let creator = Uuid::new_v4();
        let mut profile = UserProfile::new(Uuid::new_v4());
        profile.creators_interests.top_creators.push(CreatorNode {
            creator_id: creator,
            score: 3.0,
            last_updated: Utc::now(),
            skips: 3,
            last_skip_at: None,
        });

        let mut blob = SessionBlob {
            user_id: profile.user_id,
            ..Default::default()
        };
        blob.top_creators.push(CreatorNode {
            creator_id: creator,
            score: 3.0,
            last_updated: Utc::now(),
            skips: 3,
            last_skip_at: None,
        });

        merge_creators(&mut profile, &blob, 0.25, &config);

        assert!(profile.creators_interests.watched_creators_pool.iter().any(|w| w.creator_id == creator));
        assert!(!profile.creators_interests.top_creators.iter().any(|n| n.creator_id == creator));
    }
}
