//! Creator engagement: the five-state machine (Followed, Positive, Watched,
//! Skipped, Absent) that governs how a user's standing with a given creator
//! moves in response to positive and negative engagement. `WATCHED_THRESHOLD`
//! only matters at merge-back time (see `session_lifecycle`) — live skip
//! handling here only ever checks the hard-skip threshold, so a creator
//! doesn't flicker between Positive and Watched mid-session on ordinary skip
//! noise.

use crate::config::Config;
use crate::models::{CreatorNode, CreatorState, SkippedEntry, UserProfile, WatchedEntry};
use crate::pools::{find_or_init, insert_into_pools, update_node_score};
use crate::scoring::EmaMode;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

#[derive(Clone)]
pub struct CreatorService {
    config: Config,
}

impl CreatorService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn current_state(&self, profile: &UserProfile, creator_id: Uuid) -> CreatorState {
        if profile.following.iter().any(|f| f.user_id == creator_id) {
            return CreatorState::Followed;
        }
        if profile
            .creators_interests
            .top_creators
            .iter()
            .chain(profile.creators_interests.rising_creators.iter())
            .any(|n| n.creator_id == creator_id)
        {
            return CreatorState::Positive;
        }
        if profile
            .creators_interests
            .watched_creators_pool
            .iter()
            .any(|w| w.creator_id == creator_id)
        {
            return CreatorState::Watched;
        }
        if profile
            .creators_interests
            .skipped_creators_pool
            .iter()
            .any(|s| s.creator_id == creator_id)
        {
            return CreatorState::Skipped;
        }
        CreatorState::Absent
    }

    /// Positive engagement on `creator_id`.
    pub fn score_creator(&self, profile: &mut UserProfile, mode: EmaMode, creator_id: Uuid, engagement_score: f64) {
        let now = Utc::now();
        match self.current_state(profile, creator_id) {
            CreatorState::Followed => {
                if let Some(f) = profile.following.iter_mut().find(|f| f.user_id == creator_id) {
                    f.skips = f.skips.saturating_sub(1);
                    f.score = crate::scoring::ema_update(
                        f.score,
                        f.last_updated,
                        engagement_score,
                        now,
                        mode,
                        self.config.half_life_days,
                        self.config.ema_alpha_session,
                        self.config.ema_alpha_db,
                    );
                    f.last_updated = now;
                    if f.skips >= self.config.harskip_threshold {
                        f.score = 0.0;
                        f.reentry_at = Some(now + Duration::milliseconds(self.config.reentry_delay_ms));
                    }
                }
            }
            CreatorState::Positive => {
                self.place_positive(profile, mode, now, creator_id, engagement_score);
            }
            CreatorState::Watched => {
                let reached_zero = {
                    let entry = profile
                        .creators_interests
                        .watched_creators_pool
                        .iter_mut()
                        .find(|w| w.creator_id == creator_id);
                    match entry {
                        Some(entry) => {
                            entry.skips = entry.skips.saturating_sub(1);
                            entry.last_skip_update = now;
                            entry.skips == 0
                        }
                        None => false,
                    }
                };
                if reached_zero {
                    profile
                        .creators_interests
                        .watched_creators_pool
                        .retain(|w| w.creator_id != creator_id);
                    self.place_positive(profile, mode, now, creator_id, engagement_score);
                }
            }
            CreatorState::Skipped => {
                let transition = {
                    let entry = profile
                        .creators_interests
                        .skipped_creators_pool
                        .iter_mut()
                        .find(|s| s.creator_id == creator_id);
                    entry.map(|entry| {
                        entry.skips = entry.skips.saturating_sub(1);
                        if entry.skips < self.config.harskip_threshold && now >= entry.reentry_at {
                            Some(entry.skips)
                        } else {
                            if entry.skips >= self.config.harskip_threshold {
                                entry.reentry_at = now + Duration::milliseconds(self.config.reentry_delay_ms);
                            }
                            None
                        }
                    })
                };
                if let Some(Some(skips)) = transition {
                    profile
                        .creators_interests
                        .skipped_creators_pool
                        .retain(|s| s.creator_id != creator_id);
                    profile
                        .creators_interests
                        .watched_creators_pool
                        .retain(|w| w.creator_id != creator_id);
                    profile.creators_interests.watched_creators_pool.push(WatchedEntry {
                        creator_id,
                        skips,
                        last_skip_update: now,
                        reentry_at: now,
                    });
                }
            }
            CreatorState::Absent => {
                self.place_positive(profile, mode, now, creator_id, engagement_score);
            }
        }
    }

    /// Negative engagement (skip) on `creator_id`.
    pub fn skip_creator(&self, profile: &mut UserProfile, creator_id: Uuid) {
        let now = Utc::now();
        match self.current_state(profile, creator_id) {
            CreatorState::Followed => {
                if let Some(f) = profile.following.iter_mut().find(|f| f.user_id == creator_id) {
                    f.skips = (f.skips + 1).min(self.config.harskip_threshold);
                    f.score = crate::scoring::ema_update(
                        f.score,
                        f.last_updated,
                        self.config.skip_weight,
                        now,
                        EmaMode::Session,
                        self.config.half_life_days,
                        self.config.ema_alpha_session,
                        self.config.ema_alpha_db,
                    );
                    f.last_updated = now;
                    if f.skips >= self.config.harskip_threshold {
                        f.score = 0.0;
                        f.reentry_at = Some(now + Duration::milliseconds(self.config.reentry_delay_ms));
                    }
                }
            }
            CreatorState::Positive => {
                let harskip = self.config.harskip_threshold;
                let outcome = {
                    let node = profile
                        .creators_interests
                        .top_creators
                        .iter_mut()
                        .chain(profile.creators_interests.rising_creators.iter_mut())
                        .find(|n| n.creator_id == creator_id);
                    node.map(|node| {
                        node.skips += 1;
                        node.last_skip_at = Some(now);
                        node.score = crate::scoring::ema_update(
                            node.score,
                            node.last_updated,
                            self.config.skip_weight,
                            now,
                            EmaMode::Session,
                            self.config.half_life_days,
                            self.config.ema_alpha_session,
                            self.config.ema_alpha_db,
                        );
                        node.last_updated = now;
                        (node.skips, node.score)
                    })
                };

                if let Some((skips, score)) = outcome {
                    if skips >= harskip {
                        self.demote_to_skipped(profile, creator_id, now);
                    } else if score <= 0.0 && skips >= 1 {
                        profile
                            .creators_interests
                            .top_creators
                            .retain(|n| n.creator_id != creator_id);
                        profile
                            .creators_interests
                            .rising_creators
                            .retain(|n| n.creator_id != creator_id);
                        profile
                            .creators_interests
                            .watched_creators_pool
                            .retain(|w| w.creator_id != creator_id);
                        profile.creators_interests.watched_creators_pool.push(WatchedEntry {
                            creator_id,
                            skips,
                            last_skip_update: now,
                            reentry_at: now,
                        });
                    } else {
                        // reposition: re-find the already-mutated node and re-sort its pool.
                        let node = profile
                            .creators_interests
                            .top_creators
                            .iter()
                            .chain(profile.creators_interests.rising_creators.iter())
                            .find(|n| n.creator_id == creator_id)
                            .cloned();
                        if let Some(node) = node {
                            insert_into_pools(
                                &mut profile.creators_interests.top_creators,
                                &mut profile.creators_interests.rising_creators,
                                self.config.top_creator_max,
                                self.config.rising_creator_max,
                                node,
                            );
                        }
                    }
                }
            }
            CreatorState::Watched => {
                let demote = {
                    let entry = profile
                        .creators_interests
                        .watched_creators_pool
                        .iter_mut()
                        .find(|w| w.creator_id == creator_id);
                    if let Some(entry) = entry {
                        entry.skips += 1;
                        entry.last_skip_update = now;
                        entry.skips >= self.config.harskip_threshold
                    } else {
                        false
                    }
                };
                if demote {
                    profile
                        .creators_interests
                        .watched_creators_pool
                        .retain(|w| w.creator_id != creator_id);
                    self.demote_to_skipped(profile, creator_id, now);
                }
            }
            CreatorState::Skipped => {
                if let Some(entry) = profile
                    .creators_interests
                    .skipped_creators_pool
                    .iter_mut()
                    .find(|s| s.creator_id == creator_id)
                {
                    entry.skips = (entry.skips + 1).min(self.config.harskip_threshold);
                    entry.last_skip_update = now;
                    entry.reentry_at = now + Duration::milliseconds(self.config.reentry_delay_ms);
                }
            }
            CreatorState::Absent => {}
        }
    }

    fn place_positive(&self, profile: &mut UserProfile, mode: EmaMode, now: DateTime<Utc>, creator_id: Uuid, score: f64) {
        let mut node = find_or_init(
            &profile.creators_interests.top_creators,
            &profile.creators_interests.rising_creators,
            &creator_id,
            || CreatorNode {
                creator_id,
                score: 0.0,
                last_updated: now,
                skips: 0,
                last_skip_at: None,
            },
        );
        update_node_score(
            &mut node,
            score,
            now,
            self.config.half_life_days,
            self.config.ema_alpha_session,
            self.config.ema_alpha_db,
            mode,
        );
        insert_into_pools(
            &mut profile.creators_interests.top_creators,
            &mut profile.creators_interests.rising_creators,
            self.config.top_creator_max,
            self.config.rising_creator_max,
            node,
        );
    }

    fn demote_to_skipped(&self, profile: &mut UserProfile, creator_id: Uuid, now: DateTime<Utc>) {
        profile
            .creators_interests
            .top_creators
            .retain(|n| n.creator_id != creator_id);
        profile
            .creators_interests
            .rising_creators
            .retain(|n| n.creator_id != creator_id);
        profile
            .creators_interests
            .skipped_creators_pool
            .retain(|s| s.creator_id != creator_id);
        profile.creators_interests.skipped_creators_pool.push(SkippedEntry {
            creator_id,
            skips: self.config.harskip_threshold,
            last_skip_update: now,
            reentry_at: now + Duration::milliseconds(self.config.reentry_delay_ms),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_defaults_for_test()
    }

    #[test]
    fn absent_creator_becomes_positive_on_score() {
        let svc = CreatorService::new(config());
        let mut profile = UserProfile::new(Uuid::new_v4());
        let creator = Uuid::new_v4();

        svc.score_creator(&mut profile, EmaMode::Session, creator, 3.0);

        assert_eq!(svc.current_state(&profile, creator), CreatorState::Positive);
    }

    #[test]
    fn positive_creator_demotes_to_skipped_after_harskip_threshold() {
        let svc = CreatorService::new(config());
        let mut profile = UserProfile::new(Uuid::new_v4());
        let creator = Uuid::new_v4();
        svc.score_creator(&mut profile, EmaMode::Session, creator, 3.0);

        for _ in 0..config().harskip_threshold {
            svc.skip_creator(&mut profile, creator);
        }

        assert_eq!(svc.current_state(&profile, creator), CreatorState::Skipped);
    }

    #[test]
    fn followed_creator_never_demotes_on_skip() {
        let svc = CreatorService::new(config());
        let mut profile = UserProfile::new(Uuid::new_v4());
        let creator = Uuid::new_v4();
        profile.following.push(crate::models::FollowedCreator {
            user_id: creator,
            score: 0.0,
            last_updated: Utc::now(),
            skips: 0,
            last_skip_at: None,
            reentry_at: None,
        });

        for _ in 0..50 {
            svc.skip_creator(&mut profile, creator);
        }

        assert_eq!(svc.current_state(&profile, creator), CreatorState::Followed);
    }
}
