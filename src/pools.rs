//! Pool manager: `findOrInit`, `updateNodeScore`, `insertIntoPools` over
//! bounded, score-sorted sequences. Implemented generically over a small
//! `PoolNode` trait so the same three operations serve categories,
//! subcategories, specifics, and creators without ad-hoc dynamic field access.
//!
//! These functions never hand back a reference into a vector that the caller
//! must re-find later: `find_or_init` returns an owned node, the caller
//! mutates that owned value via `update_node_score`, and `insert_into_pools`
//! consumes it. There is no double-lookup.

use crate::models::{CategoryNode, CreatorNode, SpecificNode, SubNode};
use crate::scoring::{ema_update, EmaMode};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

pub trait PoolNode: Clone {
    type Key: PartialEq + Clone;

    fn key(&self) -> Self::Key;
    fn score(&self) -> f64;
    fn set_score(&mut self, score: f64);
    fn last_updated(&self) -> DateTime<Utc>;
    fn set_last_updated(&mut self, now: DateTime<Utc>);
}

impl PoolNode for CategoryNode {
    type Key = String;
    fn key(&self) -> String {
        self.name.clone()
    }
    fn score(&self) -> f64 {
        self.score
    }
    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
    fn set_last_updated(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

impl PoolNode for SubNode {
    type Key = String;
    fn key(&self) -> String {
        self.name.clone()
    }
    fn score(&self) -> f64 {
        self.score
    }
    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
    fn set_last_updated(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

impl PoolNode for SpecificNode {
    type Key = String;
    fn key(&self) -> String {
        self.name.clone()
    }
    fn score(&self) -> f64 {
        self.score
    }
    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
    fn set_last_updated(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

impl PoolNode for CreatorNode {
    type Key = uuid::Uuid;
    fn key(&self) -> uuid::Uuid {
        self.creator_id
    }
    fn score(&self) -> f64 {
        self.score
    }
    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
    fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
    fn set_last_updated(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

/// Scans both sequences for a node keyed by `id`; returns a clone of the
/// existing node, or a freshly built one from `defaults` (caller inserts it).
pub fn find_or_init<T: PoolNode>(
    primary: &[T],
    secondary: &[T],
    id: &T::Key,
    defaults: impl FnOnce() -> T,
) -> T {
    if let Some(found) = primary.iter().find(|n| &n.key() == id) {
        return found.clone();
    }
    if let Some(found) = secondary.iter().find(|n| &n.key() == id) {
        return found.clone();
    }
    defaults()
}

/// `node.score := emaUpdate(node.score, node.lastUpdated, newScore, session-mode)`.
pub fn update_node_score<T: PoolNode>(
    node: &mut T,
    new_score: f64,
    now: DateTime<Utc>,
    half_life_days: f64,
    alpha_session: f64,
    alpha_db: f64,
    mode: EmaMode,
) {
    let updated = ema_update(
        node.score(),
        node.last_updated(),
        new_score,
        now,
        mode,
        half_life_days,
        alpha_session,
        alpha_db,
    );
    node.set_score(updated);
    node.set_last_updated(now);
}

fn sort_desc<T: PoolNode>(v: &mut [T]) {
    v.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));
}

fn push_or_replace<T: PoolNode>(pool: &mut Vec<T>, cap: usize, candidate: T) {
    if pool.len() < cap {
        pool.push(candidate);
        sort_desc(pool);
        return;
    }
    let tail_idx = pool.len() - 1;
    if candidate.score() > pool[tail_idx].score() {
        pool[tail_idx] = candidate;
        sort_desc(pool);
    }
    // else: dropped, candidate does not beat the tail
}

/// Idempotent re-insertion: evict any existing copy of this key from both
/// pools first, then place the candidate by score against the caps.
pub fn insert_into_pools<T: PoolNode>(
    primary: &mut Vec<T>,
    secondary: &mut Vec<T>,
    cap_primary: usize,
    cap_secondary: usize,
    candidate: T,
) {
    let key = candidate.key();
    primary.retain(|n| n.key() != key);
    secondary.retain(|n| n.key() != key);

    if candidate.score() < 0.0 {
        return;
    }

    if primary.len() < cap_primary {
        primary.push(candidate);
        sort_desc(primary);
        return;
    }

    let tail_idx = primary.len() - 1;
    if candidate.score() > primary[tail_idx].score() {
        let bumped = std::mem::replace(&mut primary[tail_idx], candidate);
        sort_desc(primary);
        push_or_replace(secondary, cap_secondary, bumped);
    } else {
        push_or_replace(secondary, cap_secondary, candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cat(name: &str, score: f64) -> CategoryNode {
        CategoryNode {
            name: name.to_string(),
            score,
            last_updated: Utc::now(),
            top_subs: vec![],
            rising_subs: vec![],
        }
    }

    #[test]
    fn find_or_init_returns_existing_node() {
        let primary = vec![cat("Tech", 5.0)];
        let secondary: Vec<CategoryNode> = vec![];
        let found = find_or_init(&primary, &secondary, &"Tech".to_string(), || cat("Tech", 0.0));
        assert_eq!(found.score, 5.0);
    }

    #[test]
    fn find_or_init_builds_default_when_absent() {
        let primary: Vec<CategoryNode> = vec![];
        let secondary: Vec<CategoryNode> = vec![];
        let found = find_or_init(&primary, &secondary, &"Tech".to_string(), || cat("Tech", 0.0));
        assert_eq!(found.score, 0.0);
    }

    #[test]
    fn insert_into_pools_caps_primary_and_demotes_tail_to_secondary() {
        let mut primary = vec![cat("A", 10.0), cat("B", 9.0)];
        let mut secondary: Vec<CategoryNode> = vec![];
        insert_into_pools(&mut primary, &mut secondary, 2, 2, cat("C", 9.5));
        assert_eq!(primary.len(), 2);
        assert_eq!(primary[0].name, "A");
        assert_eq!(primary[1].name, "C");
        assert_eq!(secondary.len(), 1);
        assert_eq!(secondary[0].name, "B");
    }

    #[test]
    fn insert_into_pools_drops_negative_score_candidate() {
        let mut primary: Vec<CategoryNode> = vec![];
        let mut secondary: Vec<CategoryNode> = vec![];
        insert_into_pools(&mut primary, &mut secondary, 2, 2, cat("X", -1.0));
        assert!(primary.is_empty());
        assert!(secondary.is_empty());
    }

    #[test]
    fn insert_into_pools_is_idempotent() {
        let mut primary = vec![cat("A", 10.0)];
        let mut secondary: Vec<CategoryNode> = vec![];
        insert_into_pools(&mut primary, &mut secondary, 3, 3, cat("B", 7.0));
        let after_first = primary.clone();
        insert_into_pools(&mut primary, &mut secondary, 3, 3, cat("B", 7.0));
        assert_eq!(primary, after_first);
    }

    #[test]
    fn top_and_rising_stay_disjoint_on_name() {
        let mut top = vec![cat("A", 10.0)];
        let mut rising: Vec<CategoryNode> = vec![cat("A", 3.0)];
        // simulate moving "A" into top: rising copy must be evicted by the caller
        // re-using insert_into_pools against the same two vectors.
        insert_into_pools(&mut top, &mut rising, 20, 12, cat("A", 11.0));
        assert!(!top.iter().any(|n| n.name == "A" && rising.iter().any(|r| r.name == "A")));
    }
}
