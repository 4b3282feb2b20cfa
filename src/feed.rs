//! Feed assembly: source candidates from every pool/bucket, dedup and tag
//! each, score the survivors, then interleave fairly across buckets instead
//! of letting the highest-scoring bucket crowd everything else out. A fixed
//! number of slots (`NON_EXPLORE`) stay reserved for the scored buckets; the
//! rest of the feed is backfilled from a random explore sample so the feed
//! never goes fully deterministic.

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{Bucket, EntityType, FeedPost, Post, UserProfile};
use crate::posts_store::PostsStore;
use crate::profile_store::ProfileStore;
use crate::scoring::time_decay;
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Clone)]
pub struct FeedAssembler {
    posts: PostsStore,
    profile_store: ProfileStore,
    config: Config,
}

const PER_BUCKET_LIMIT: i64 = 10;

impl FeedAssembler {
    pub fn new(posts: PostsStore, profile_store: ProfileStore, config: Config) -> Self {
        Self { posts, profile_store, config }
    }

    pub async fn assemble(&self, profile: &UserProfile) -> AppResult<Vec<FeedPost>> {
        let now = Utc::now();
        let mut tagged: Vec<(Bucket, Post)> = Vec::new();

        // A hard-skipped creator's posts are excluded from every bucket
        // except `SkipReentry` itself (gated on `reentry_at <= now`) — that
        // bucket is the only intended path back into the feed.
        let skipped_creator_ids: HashSet<Uuid> = profile
            .creators_interests
            .skipped_creators_pool
            .iter()
            .map(|s| s.creator_id)
            .collect();

        for cat in &profile.top_interests {
            for p in self.posts.find_by_category(&cat.name, PER_BUCKET_LIMIT).await? {
                if !skipped_creator_ids.contains(&p.creator) {
                    tagged.push((Bucket::CatTop, p));
                }
            }
        }
        for cat in &profile.rising_interests {
            for p in self.posts.find_by_category(&cat.name, PER_BUCKET_LIMIT).await? {
                if !skipped_creator_ids.contains(&p.creator) {
                    tagged.push((Bucket::CatRising, p));
                }
            }
        }
        for f in &profile.following {
            for p in self.posts.find_by_creator(f.user_id, PER_BUCKET_LIMIT).await? {
                tagged.push((Bucket::CreatorFollowed, p));
            }
        }
        for c in &profile.creators_interests.top_creators {
            if skipped_creator_ids.contains(&c.creator_id) {
                continue;
            }
            for p in self.posts.find_by_creator(c.creator_id, PER_BUCKET_LIMIT).await? {
                tagged.push((Bucket::CreatorTop, p));
            }
        }
        for c in &profile.creators_interests.rising_creators {
            if skipped_creator_ids.contains(&c.creator_id) {
                continue;
            }
            for p in self.posts.find_by_creator(c.creator_id, PER_BUCKET_LIMIT).await? {
                tagged.push((Bucket::CreatorRising, p));
            }
        }
        for w in &profile.creators_interests.watched_creators_pool {
            if now >= w.reentry_at {
                for p in self.posts.find_by_creator(w.creator_id, PER_BUCKET_LIMIT).await? {
                    tagged.push((Bucket::Watched, p));
                }
            }
        }
        for s in &profile.creators_interests.skipped_creators_pool {
            if now >= s.reentry_at {
                for p in self.posts.find_by_creator(s.creator_id, PER_BUCKET_LIMIT).await? {
                    tagged.push((Bucket::SkipReentry, p));
                }
            }
        }
        for p in self.posts.find_trending(PER_BUCKET_LIMIT * 2).await? {
            tagged.push((Bucket::Trending, p));
        }
        for p in self.posts.find_rising(PER_BUCKET_LIMIT).await? {
            tagged.push((Bucket::Rising, p));
        }
        let recent_since = now - chrono::Duration::milliseconds(self.config.recent_window_ms);
        for p in self.posts.find_recent(recent_since, PER_BUCKET_LIMIT * 2).await? {
            tagged.push((Bucket::Recent, p));
        }
        for p in self.posts.find_evergreen(PER_BUCKET_LIMIT).await? {
            tagged.push((Bucket::Evergreen, p));
        }
        let explore_budget = self.config.feed_size.saturating_sub(self.config.non_explore_slots).max(1) * 2;
        let explore_posts = self.posts.find_explore_sample(explore_budget as i64).await?;

        let deduped = self.dedup(tagged, &profile.seen_posts);
        let scored = self.score_all(profile, deduped).await?;
        let explore_scored: Vec<FeedPost> = explore_posts
            .into_iter()
            .filter(|p| !profile.seen_posts.contains(&p.id))
            .map(|post| FeedPost {
                overall_score: post.cumulative_score,
                bucket: Bucket::Explore,
                post,
            })
            .collect();

        Ok(self.interleave(scored, explore_scored))
    }

    /// First bucket a post is seen in wins; later duplicate appearances
    /// (e.g. a post that's both in a followed creator's bucket and trending)
    /// are dropped rather than re-scored twice.
    fn dedup(&self, tagged: Vec<(Bucket, Post)>, seen: &HashSet<Uuid>) -> Vec<(Bucket, Post)> {
        let mut seen_ids: HashSet<Uuid> = seen.clone();
        let mut out = Vec::with_capacity(tagged.len());
        for (bucket, post) in tagged {
            if seen_ids.insert(post.id) {
                out.push((bucket, post));
            }
        }
        out
    }

    /// Composite score (spec §4.7 step 5): `categoryNode.score`/`creatorNode.score`
    /// when the profile already tracks the post's category/creator, else a
    /// `0.1 * avg` fallback pulled from the global category stats / creator
    /// stats rows, with the personal term discounted by the post's own age.
    async fn score_all(&self, profile: &UserProfile, tagged: Vec<(Bucket, Post)>) -> AppResult<Vec<FeedPost>> {
        let now = Utc::now();
        let mut out = Vec::with_capacity(tagged.len());

        for (bucket, post) in tagged {
            let interest_component = match profile
                .top_interests
                .iter()
                .chain(profile.rising_interests.iter())
                .find(|c| c.name == post.category)
                .map(|c| c.score)
            {
                Some(score) => score,
                None => {
                    let cat_avg = self.profile_store.get_global_stats(EntityType::Category, &post.category).await?.average();
                    0.1 * cat_avg
                }
            };
            let creator_component = match profile
                .creators_interests
                .top_creators
                .iter()
                .chain(profile.creators_interests.rising_creators.iter())
                .find(|c| c.creator_id == post.creator)
                .map(|c| c.score)
                .or_else(|| profile.following.iter().find(|f| f.user_id == post.creator).map(|f| f.score))
            {
                Some(score) => score,
                None => {
                    let creator_avg = self.profile_store.get_creator_stats(post.creator).await?.average();
                    0.1 * creator_avg
                }
            };

            let time_decay_factor = time_decay((now - post.created_at).num_milliseconds(), self.config.half_life_days);
            let personal = self.config.interest_weight * interest_component + self.config.creator_weight * creator_component;
            let overall_score = self.config.personal_weight * time_decay_factor * personal
                + self.config.raw_weight * post.raw_score
                + self.config.trend_weight * post.trending_score
                + self.config.bayesian_weight * post.bayesian_score;

            out.push(FeedPost { post, bucket, overall_score });
        }

        Ok(out)
    }

    /// Per-bucket cap. Buckets this implementation never
    /// tags (`CatExtra`, `CreatorExtra`, `Unknown`) keep a cap for
    /// completeness but simply never accumulate usage.
    fn cap_for(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::SkipReentry => self.config.cap_skip_reentry,
            Bucket::Watched => self.config.cap_watched,
            Bucket::CatTop | Bucket::CatRising | Bucket::CatExtra => self.config.cap_cat,
            Bucket::CreatorTop | Bucket::CreatorRising | Bucket::CreatorExtra => self.config.cap_creator,
            Bucket::CreatorFollowed => self.config.cap_creator_followed,
            Bucket::Trending => self.config.cap_trending,
            Bucket::Rising => self.config.cap_rising,
            Bucket::Recent => self.config.cap_recent,
            Bucket::Evergreen => self.config.cap_evergreen,
            Bucket::Unknown | Bucket::Explore => self.config.cap_unknown,
        }
    }

    /// Fair-share interleave: repeatedly pick the
    /// highest-scored candidate from whichever eligible bucket (usage below
    /// its cap, candidates remaining) has the *least* usage so far, so no
    /// single strong bucket crowds out the others before `non_explore_slots`
    /// is filled. Remaining slots up to `feed_size` are padded from the
    /// explore sample.
    fn interleave(&self, scored: Vec<FeedPost>, mut explore: Vec<FeedPost>) -> Vec<FeedPost> {
        let priority = [
            Bucket::CreatorFollowed,
            Bucket::CatTop,
            Bucket::CreatorTop,
            Bucket::CatRising,
            Bucket::CreatorRising,
            Bucket::CatExtra,
            Bucket::CreatorExtra,
            Bucket::Trending,
            Bucket::Rising,
            Bucket::Watched,
            Bucket::SkipReentry,
            Bucket::Recent,
            Bucket::Evergreen,
            Bucket::Unknown,
        ];

        let mut queues: Vec<(Bucket, usize, Vec<FeedPost>)> = priority
            .iter()
            .map(|b| {
                let mut v: Vec<FeedPost> = scored.iter().filter(|fp| fp.bucket == *b).cloned().collect();
                v.sort_by(|a, b| b.overall_score.partial_cmp(&a.overall_score).unwrap_or(std::cmp::Ordering::Equal));
                (*b, 0usize, v)
            })
            .collect();

        let non_explore_cap = self.config.non_explore_slots.min(self.config.feed_size);
        let mut result: Vec<FeedPost> = Vec::with_capacity(self.config.feed_size);

        while result.len() < non_explore_cap {
            let min_used = queues
                .iter()
                .filter(|(b, used, v)| *used < self.cap_for(*b) && *used < v.len())
                .map(|(_, used, _)| *used)
                .min();

            let Some(min_used) = min_used else { break };

            // Highest score wins; a score tie goes to the lower-index bucket
            // in `priority` order (scanned low-to-high, first strictly-
            // greater replaces, so an equal score never displaces it).
            let mut pick: Option<(usize, f64)> = None;
            for (i, (b, used, v)) in queues.iter().enumerate() {
                if *used == min_used && *used < self.cap_for(*b) && *used < v.len() {
                    let score = v[*used].overall_score;
                    if pick.map(|(_, best)| score > best).unwrap_or(true) {
                        pick = Some((i, score));
                    }
                }
            }

            let Some((bucket_idx, _)) = pick else { break };
            let (_, used, v) = &mut queues[bucket_idx];
            result.push(v[*used].clone());
            *used += 1;
        }

        explore.sort_by(|a, b| b.overall_score.partial_cmp(&a.overall_score).unwrap_or(std::cmp::Ordering::Equal));
        let mut explore_iter = explore.into_iter();
        while result.len() < self.config.feed_size {
            match explore_iter.next() {
                Some(post) => result.push(post),
                None => break,
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts_store::PostsStore;
    use crate::profile_store::ProfileStore;

    fn make_post(id: Uuid, score: f64) -> Post {
        let now = Utc::now();
        Post {
            id,
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
            cumulative_score: score,
            is_evergreen: false,
            is_rising: false,
            created_at: now,
            last_trending_update: now,
            last_score_update: now,
        }
    }

    fn make_feed_post(bucket: Bucket, score: f64) -> FeedPost {
        FeedPost { post: make_post(Uuid::new_v4(), score), bucket, overall_score: score }
    }

    fn assembler() -> FeedAssembler {
        FeedAssembler::new(
            PostsStore::new_unconnected_for_test(),
            ProfileStore::new_unconnected_for_test(),
            Config::from_defaults_for_test(),
        )
    }

    /// Fixed candidate set: a deep `CatTop` queue (5 candidates, cap 3) next
    /// to a single-item `CreatorTop` queue (1 candidate, cap 2). Fair-share
    /// interleave must surface the `CreatorTop` candidate right after the
    /// single highest-scoring `CatTop` candidate, rather than letting `CatTop`
    /// exhaust its entire cap first just because its scores are all higher.
    #[test]
    fn interleave_gives_a_thin_bucket_a_turn_before_a_deep_one_exhausts_its_cap() {
        let fa = assembler();
        let scored = vec![
            make_feed_post(Bucket::CatTop, 100.0),
            make_feed_post(Bucket::CatTop, 90.0),
            make_feed_post(Bucket::CatTop, 80.0),
            make_feed_post(Bucket::CatTop, 70.0),
            make_feed_post(Bucket::CatTop, 60.0),
            make_feed_post(Bucket::CreatorTop, 50.0),
        ];

        let result = fa.interleave(scored, vec![]);

        assert_eq!(result[0].bucket, Bucket::CatTop);
        assert_eq!(result[1].bucket, Bucket::CreatorTop);
        assert_eq!(result[2].bucket, Bucket::CatTop);
    }

    /// Same fixed set: `CatTop`'s cap is 3, so only 3 of its 5 candidates
    /// survive into the assembled result no matter how high their scores are.
    #[test]
    fn interleave_never_exceeds_a_buckets_cap() {
        let fa = assembler();
        let scored = vec![
            make_feed_post(Bucket::CatTop, 100.0),
            make_feed_post(Bucket::CatTop, 90.0),
            make_feed_post(Bucket::CatTop, 80.0),
            make_feed_post(Bucket::CatTop, 70.0),
            make_feed_post(Bucket::CatTop, 60.0),
        ];

        let result = fa.interleave(scored, vec![]);

        assert_eq!(result.iter().filter(|fp| fp.bucket == Bucket::CatTop).count(), fa.cap_for(Bucket::CatTop));
    }

    /// With no scored candidates at all, the feed is backfilled purely from
    /// the explore sample, highest-scored first, up to `feed_size`.
    #[test]
    fn interleave_backfills_from_explore_when_no_scored_candidates() {
        let fa = assembler();
        let explore = vec![make_feed_post(Bucket::Explore, 5.0), make_feed_post(Bucket::Explore, 9.0)];

        let result = fa.interleave(vec![], explore);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].overall_score, 9.0);
        assert_eq!(result[1].overall_score, 5.0);
    }
}
