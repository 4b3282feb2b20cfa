//! Interest scoring: cascades an engagement through category → subcategory →
//! specific, updating global/user-interest counters at the category and
//! subcategory levels and placing the touched nodes into their pools. The
//! specific level skips Bayesian smoothing entirely and scores on the raw
//! engagement weight — there's no meaningful global prior at that
//! granularity, and smoothing it would just drag sparse, highly specific
//! taste signals back toward the category average.

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{CategoryNode, EntityType, SpecificNode, SubNode, UserProfile};
use crate::pools::{find_or_init, insert_into_pools, update_node_score};
use crate::profile_store::ProfileStore;
use crate::scoring::{bayesian_smooth, choose_prior_count, ema_update, EmaMode};
use chrono::Utc;

#[derive(Clone)]
pub struct InterestService {
    profile_store: ProfileStore,
    config: Config,
}

impl InterestService {
    pub fn new(profile_store: ProfileStore, config: Config) -> Self {
        Self { profile_store, config }
    }

    /// Positive engagement on `(category, sub_category, specific)`. `mode`
    /// picks the EMA alpha and selects which counters get touched: the
    /// session path updates in-memory pools only, the persistent path also
    /// increments the durable global/user-interest counters.
    pub async fn score_interest(
        &self,
        profile: &mut UserProfile,
        mode: EmaMode,
        category: &str,
        sub_category: Option<&str>,
        specific: Option<&str>,
        engagement_score: f64,
    ) -> AppResult<()> {
        let now = Utc::now();
        let user_id = profile.user_id;

        let category_score = self
            .smoothed_score(mode, user_id, EntityType::Category, category, engagement_score)
            .await?;
        self.place_category(profile, mode, now, category, category_score);

        if let Some(sub) = sub_category {
            let qualified = format!("{category}/{sub}");
            let sub_score = self
                .smoothed_score(mode, user_id, EntityType::Subcategory, &qualified, engagement_score)
                .await?;
            self.place_sub(profile, mode, now, category, sub, sub_score);

            if let Some(spec) = specific {
                // raw weight, no smoothing — see module docs.
                self.place_specific(profile, mode, now, category, sub, spec, engagement_score);
            }
        }

        Ok(())
    }

    /// Negative engagement (skip) on `(category, sub_category, specific)`.
    /// Applies `SKIP_WEIGHT` via `updateNodeScore` at each provided level; a
    /// node whose post-update score drops to zero or below is evicted from
    /// both pools at that level rather than repositioned. No-op if the
    /// category itself isn't present in either pool.
    pub fn skip_interest(&self, profile: &mut UserProfile, category: &str, sub_category: Option<&str>, specific: Option<&str>) {
        let now = Utc::now();
        let weight = self.config.skip_weight;

        if !profile.top_interests.iter().chain(profile.rising_interests.iter()).any(|c| c.name == category) {
            return;
        }

        let mut cat_node = find_or_init(&profile.top_interests, &profile.rising_interests, &category.to_string(), || CategoryNode {
            name: category.to_string(),
            score: 0.0,
            last_updated: now,
            top_subs: vec![],
            rising_subs: vec![],
        });
        update_node_score(&mut cat_node, weight, now, self.config.half_life_days, self.config.ema_alpha_session, self.config.ema_alpha_db, EmaMode::Session);
        if cat_node.score <= 0.0 {
            profile.top_interests.retain(|c| c.name != category);
            profile.rising_interests.retain(|c| c.name != category);
            return;
        }
        insert_into_pools(&mut profile.top_interests, &mut profile.rising_interests, self.config.top_cat_max, self.config.rising_cat_max, cat_node);

        let Some(sub) = sub_category else { return };
        let Some(cat) = profile.top_interests.iter_mut().chain(profile.rising_interests.iter_mut()).find(|c| c.name == category) else {
            return;
        };
        if !cat.top_subs.iter().chain(cat.rising_subs.iter()).any(|s| s.name == sub) {
            return;
        }
        let mut sub_node = find_or_init(&cat.top_subs, &cat.rising_subs, &sub.to_string(), || SubNode {
            name: sub.to_string(),
            score: 0.0,
            last_updated: now,
            specific: vec![],
        });
        update_node_score(&mut sub_node, weight, now, self.config.half_life_days, self.config.ema_alpha_session, self.config.ema_alpha_db, EmaMode::Session);
        if sub_node.score <= 0.0 {
            cat.top_subs.retain(|s| s.name != sub);
            cat.rising_subs.retain(|s| s.name != sub);
            return;
        }
        insert_into_pools(&mut cat.top_subs, &mut cat.rising_subs, self.config.top_sub_max, self.config.rising_sub_max, sub_node);

        let Some(spec) = specific else { return };
        let Some(sub_node) = cat.top_subs.iter_mut().chain(cat.rising_subs.iter_mut()).find(|s| s.name == sub) else {
            return;
        };
        let Some(current) = sub_node.specific.iter().find(|n| n.name == spec).cloned() else {
            return;
        };
        let updated = crate::scoring::ema_update(
            current.score,
            current.last_updated,
            weight,
            now,
            EmaMode::Session,
            self.config.half_life_days,
            self.config.ema_alpha_session,
            self.config.ema_alpha_db,
        );
        sub_node.specific.retain(|n| n.name != spec);
        if updated > 0.0 {
            sub_node.specific.push(SpecificNode { name: spec.to_string(), score: updated, last_updated: now });
            sub_node.specific.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            sub_node.specific.truncate(self.config.specific_max);
        }
    }

    async fn smoothed_score(
        &self,
        mode: EmaMode,
        user_id: uuid::Uuid,
        entity_type: EntityType,
        name: &str,
        engagement_score: f64,
    ) -> AppResult<f64> {
        match mode {
            EmaMode::Session => Ok(engagement_score),
            EmaMode::Db => {
                let global = self.profile_store.get_global_stats(entity_type, name).await?;
                let prior_count = choose_prior_count(
                    global.impression_count,
                    self.config.prior_count_min,
                    self.config.prior_count_max,
                );
                self.profile_store.incr_global_stats(entity_type, name, engagement_score).await?;
                let updated_user = self
                    .profile_store
                    .incr_user_interest_stats(user_id, entity_type, name, engagement_score)
                    .await?;
                Ok(bayesian_smooth(
                    global.average(),
                    prior_count,
                    updated_user.total_engagement,
                    updated_user.impression_count,
                ))
            }
        }
    }

    fn place_category(&self, profile: &mut UserProfile, mode: EmaMode, now: chrono::DateTime<Utc>, name: &str, smoothed: f64) {
        let mut node = find_or_init(&profile.top_interests, &profile.rising_interests, &name.to_string(), || {
            CategoryNode {
                name: name.to_string(),
                score: 0.0,
                last_updated: now,
                top_subs: vec![],
                rising_subs: vec![],
            }
        });
        update_node_score(
            &mut node,
            smoothed,
            now,
            self.config.half_life_days,
            self.config.ema_alpha_session,
            self.config.ema_alpha_db,
            mode,
        );
        insert_into_pools(
            &mut profile.top_interests,
            &mut profile.rising_interests,
            self.config.top_cat_max,
            self.config.rising_cat_max,
            node,
        );
    }

    fn place_sub(
        &self,
        profile: &mut UserProfile,
        mode: EmaMode,
        now: chrono::DateTime<Utc>,
        category: &str,
        sub: &str,
        smoothed: f64,
    ) {
        let Some(cat) = profile
            .top_interests
            .iter_mut()
            .chain(profile.rising_interests.iter_mut())
            .find(|c| c.name == category)
        else {
            return;
        };

        let mut node = find_or_init(&cat.top_subs, &cat.rising_subs, &sub.to_string(), || SubNode {
            name: sub.to_string(),
            score: 0.0,
            last_updated: now,
            specific: vec![],
        });
        update_node_score(
            &mut node,
            smoothed,
            now,
            self.config.half_life_days,
            self.config.ema_alpha_session,
            self.config.ema_alpha_db,
            mode,
        );
        insert_into_pools(
            &mut cat.top_subs,
            &mut cat.rising_subs,
            self.config.top_sub_max,
            self.config.rising_sub_max,
            node,
        );
    }

    fn place_specific(
        &self,
        profile: &mut UserProfile,
        mode: EmaMode,
        now: chrono::DateTime<Utc>,
        category: &str,
        sub: &str,
        specific: &str,
        raw_score: f64,
    ) {
        let Some(sub_node) = profile
            .top_interests
            .iter_mut()
            .chain(profile.rising_interests.iter_mut())
            .filter_map(|c| if c.name == category { Some(c) } else { None })
            .flat_map(|c| c.top_subs.iter_mut().chain(c.rising_subs.iter_mut()))
            .find(|s| s.name == sub)
        else {
            return;
        };

        let current = sub_node
            .specific
            .iter()
            .find(|n| n.name == specific)
            .cloned()
            .unwrap_or(SpecificNode {
                name: specific.to_string(),
                score: 0.0,
                last_updated: now,
            });
        let updated = ema_update(
            current.score,
            current.last_updated,
            raw_score,
            now,
            mode,
            self.config.half_life_days,
            self.config.ema_alpha_session,
            self.config.ema_alpha_db,
        );

        sub_node.specific.retain(|n| n.name != specific);
        sub_node.specific.push(SpecificNode {
            name: specific.to_string(),
            score: updated,
            last_updated: now,
        });
        sub_node
            .specific
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        sub_node.specific.truncate(self.config.specific_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_config() -> Config {
        Config::from_defaults_for_test()
    }

    #[tokio::test]
    async fn session_mode_places_category_without_store_access() {
        let store = ProfileStore::new_unconnected_for_test();
        let svc = InterestService::new(store, test_config());
        let mut profile = UserProfile::new(Uuid::new_v4());

        svc.score_interest(&mut profile, EmaMode::Session, "tech", Some("rust"), Some("async"), 3.0)
            .await
            .unwrap();

        assert_eq!(profile.top_interests.len(), 1);
        assert_eq!(profile.top_interests[0].name, "tech");
        assert!(profile.top_interests[0].score > 0.0);
        assert_eq!(profile.top_interests[0].top_subs.len(), 1);
        assert_eq!(profile.top_interests[0].top_subs[0].specific.len(), 1);
        assert_eq!(profile.top_interests[0].top_subs[0].specific[0].name, "async");
    }
}
