//! Fast-store client: the session JSON blob, the `sessions:lastAccess` sorted
//! set, and the `score_buffer` hash the hourly aggregator mirrors its
//! in-process map to. One `ConnectionManager` shared behind a clone.

use crate::error::AppResult;
use crate::models::SessionBlob;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use uuid::Uuid;

const SESSION_LAST_ACCESS_ZSET: &str = "sessions:lastAccess";
const SCORE_BUFFER_HASH: &str = "score_buffer";

#[derive(Clone)]
pub struct FastStore {
    manager: ConnectionManager,
}

fn session_key(session_id: &str) -> String {
    format!("sess:{session_id}")
}

impl FastStore {
    pub async fn new(redis_url: &str) -> AppResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    // ---------------- Session blob ----------------

    pub async fn get_session(&self, session_id: &str) -> AppResult<Option<SessionBlob>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(session_key(session_id)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Distinguishes "not found" from "corrupt JSON" — callers that need
    /// that distinction should parse this themselves instead of using
    /// `get_session`.
    pub async fn get_session_raw(&self, session_id: &str) -> AppResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(session_key(session_id)).await?)
    }

    pub async fn set_session(&self, session_id: &str, blob: &SessionBlob) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let body = serde_json::to_string(blob).expect("SessionBlob always serializes");
        let _: () = conn.set(session_key(session_id), body).await?;
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(session_key(session_id)).await?;
        Ok(())
    }

    // ---------------- Last-access sorted set ----------------

    pub async fn touch_last_access(&self, session_id: &str, now_ms: i64) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zadd(SESSION_LAST_ACCESS_ZSET, session_id, now_ms).await?;
        Ok(())
    }

    pub async fn remove_last_access(&self, session_id: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zrem(SESSION_LAST_ACCESS_ZSET, session_id).await?;
        Ok(())
    }

    /// Sessions whose last access is older than `older_than_ms`.
    pub async fn sessions_idle_before(&self, older_than_ms: i64) -> AppResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn
            .zrangebyscore(SESSION_LAST_ACCESS_ZSET, 0, older_than_ms)
            .await?;
        Ok(ids)
    }

    // ---------------- Score buffer hash ----------------

    pub async fn buffer_score_delta(&self, post_id: Uuid, delta: f64) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: f64 = conn
            .hincr(SCORE_BUFFER_HASH, post_id.to_string(), delta)
            .await?;
        Ok(())
    }

    pub async fn drain_score_buffer(&self) -> AppResult<Vec<(Uuid, f64)>> {
        let mut conn = self.manager.clone();
        let entries: Vec<(String, f64)> = conn.hgetall(SCORE_BUFFER_HASH).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(k, v)| Uuid::parse_str(&k).ok().map(|id| (id, v)))
            .collect())
    }

    pub async fn remove_from_score_buffer(&self, post_id: Uuid) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.hdel(SCORE_BUFFER_HASH, post_id.to_string()).await?;
        Ok(())
    }
}
