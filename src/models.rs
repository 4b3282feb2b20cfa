use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

// ===================== Interest pools =====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecificNode {
    pub name: String,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubNode {
    pub name: String,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub specific: Vec<SpecificNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryNode {
    pub name: String,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub top_subs: Vec<SubNode>,
    #[serde(default)]
    pub rising_subs: Vec<SubNode>,
}

// ===================== Creator pools =====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatorNode {
    pub creator_id: Uuid,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub skips: u32,
    pub last_skip_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedEntry {
    pub creator_id: Uuid,
    pub skips: u32,
    pub last_skip_update: DateTime<Utc>,
    pub reentry_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedEntry {
    pub creator_id: Uuid,
    pub skips: u32,
    pub last_skip_update: DateTime<Utc>,
    pub reentry_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowedCreator {
    pub user_id: Uuid,
    pub score: f64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub skips: u32,
    pub last_skip_at: Option<DateTime<Utc>>,
    pub reentry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CreatorsInterests {
    #[serde(default)]
    pub top_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub rising_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub skipped_creators_pool: Vec<SkippedEntry>,
    #[serde(default)]
    pub watched_creators_pool: Vec<WatchedEntry>,
}

/// The five-state creator machine keyed by `creatorId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatorState {
    Followed,
    Positive,
    Watched,
    Skipped,
    Absent,
}

// ===================== User profile (persistent) =====================

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserProfile {
    pub user_id: Uuid,
    #[serde(default)]
    pub top_interests: Vec<CategoryNode>,
    #[serde(default)]
    pub rising_interests: Vec<CategoryNode>,
    #[serde(default)]
    pub creators_interests: CreatorsInterests,
    #[serde(default)]
    pub following: Vec<FollowedCreator>,
    #[serde(default)]
    pub seen_posts: HashSet<Uuid>,
}

impl UserProfile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

// ===================== Post metrics =====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub creator: Uuid,
    pub category: String,
    pub sub_category: Option<String>,
    pub specific: Option<String>,
    pub impression_count: i64,
    pub engagement_sum: f64,
    pub raw_score: f64,
    pub trending_score: f64,
    pub short_term_velocity_ema: f64,
    pub historical_velocity_ema: f64,
    pub bayesian_score: f64,
    pub cumulative_score: f64,
    pub is_evergreen: bool,
    pub is_rising: bool,
    pub created_at: DateTime<Utc>,
    pub last_trending_update: DateTime<Utc>,
    pub last_score_update: DateTime<Utc>,
}

/// One engagement event inside a post's rising-window ring buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowEvent {
    pub ts: DateTime<Utc>,
    pub weight: f64,
}

// ===================== Aggregate counters =====================

#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct StatCounters {
    pub impression_count: i64,
    pub total_engagement: f64,
}

impl StatCounters {
    pub fn average(&self) -> f64 {
        if self.impression_count > 0 {
            self.total_engagement / self.impression_count as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Category,
    Subcategory,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Category => "category",
            EntityType::Subcategory => "subcategory",
        }
    }
}

// ===================== Engagement / event payloads =====================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngagementType {
    View,
    Like,
    Comment,
    Share,
    Completion,
}

impl EngagementType {
    pub fn weight(&self) -> f64 {
        match self {
            EngagementType::View => 0.5,
            EngagementType::Like => 1.0,
            EngagementType::Comment => 2.5,
            EngagementType::Share => 5.0,
            EngagementType::Completion => 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub category: String,
    #[serde(default)]
    pub sub_category: Option<String>,
    pub creator_id: Uuid,
    pub engagement_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostScoreEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub engagement_type: EngagementType,
    pub score_delta: f64,
    pub timestamp: DateTime<Utc>,
}

// ===================== Session blob (fast store) =====================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionBlob {
    pub user_id: Uuid,
    #[serde(default)]
    pub top_categories: Vec<CategoryNode>,
    #[serde(default)]
    pub rising_categories: Vec<CategoryNode>,
    #[serde(default)]
    pub top_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub rising_creators: Vec<CreatorNode>,
    #[serde(default)]
    pub watched_creators: Vec<WatchedEntry>,
    #[serde(default)]
    pub skipped_creators: Vec<SkippedEntry>,
    #[serde(default)]
    pub followed_creators: Vec<FollowedCreator>,
}

impl SessionBlob {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.user_id,
            top_categories: profile.top_interests.clone(),
            rising_categories: profile.rising_interests.clone(),
            top_creators: profile.creators_interests.top_creators.clone(),
            rising_creators: profile.creators_interests.rising_creators.clone(),
            watched_creators: profile.creators_interests.watched_creators_pool.clone(),
            skipped_creators: profile.creators_interests.skipped_creators_pool.clone(),
            followed_creators: profile.following.clone(),
        }
    }

    pub fn apply_to_profile(&self, profile: &mut UserProfile) {
        profile.top_interests = self.top_categories.clone();
        profile.rising_interests = self.rising_categories.clone();
        profile.creators_interests.top_creators = self.top_creators.clone();
        profile.creators_interests.rising_creators = self.rising_creators.clone();
        profile.creators_interests.watched_creators_pool = self.watched_creators.clone();
        profile.creators_interests.skipped_creators_pool = self.skipped_creators.clone();
        profile.following = self.followed_creators.clone();
    }
}

/// Feed assembler bucket tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    CatTop,
    CatRising,
    CatExtra,
    CreatorTop,
    CreatorRising,
    CreatorExtra,
    CreatorFollowed,
    SkipReentry,
    Watched,
    Rising,
    Trending,
    Recent,
    Evergreen,
    Unknown,
    Explore,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::CatTop => "CAT:TOP",
            Bucket::CatRising => "CAT:RISING",
            Bucket::CatExtra => "CAT:EXTRA",
            Bucket::CreatorTop => "CREATOR:TOP",
            Bucket::CreatorRising => "CREATOR:RISING",
            Bucket::CreatorExtra => "CREATOR:EXTRA",
            Bucket::CreatorFollowed => "CREATOR:FOLLOWED",
            Bucket::SkipReentry => "SKIP_REENTRY",
            Bucket::Watched => "WATCHED",
            Bucket::Rising => "RISING",
            Bucket::Trending => "TRENDING",
            Bucket::Recent => "RECENT",
            Bucket::Evergreen => "EVERGREEN",
            Bucket::Unknown => "UNKNOWN",
            Bucket::Explore => "EXPLORE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedPost {
    pub post: Post,
    pub bucket: Bucket,
    pub overall_score: f64,
}
