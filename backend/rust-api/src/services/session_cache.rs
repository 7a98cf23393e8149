use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::errors::QuizError;
use crate::metrics::track_cache_operation;
use crate::quiz::ActiveSession;

fn session_key(session_id: &str) -> String {
    format!("quiz_session:{}", session_id)
}

/// Sorted set of unfinished session ids scored by their expiry (unix seconds).
const ACTIVE_INDEX: &str = "quiz_sessions:active";

/// Where live session state is kept between requests.
#[async_trait]
pub trait SessionCache: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn load(&self, session_id: &str) -> Result<Option<ActiveSession>, QuizError>;

    async fn save(&self, session: &ActiveSession, ttl: Duration) -> Result<(), QuizError>;

    async fn remove(&self, session_id: &str) -> Result<(), QuizError>;

    /// Unfinished sessions that have not expired yet.
    async fn active_sessions(&self) -> Result<u64, QuizError>;

    async fn ping(&self) -> Result<(), QuizError>;
}

pub struct RedisSessionCache {
    redis: ConnectionManager,
}

impl RedisSessionCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, session_id: &str) -> Result<Option<ActiveSession>, QuizError> {
        let mut conn = self.redis.clone();
        let key = session_key(session_id);

        let raw: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<String>>(&mut conn)
                .await
        })
        .await?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| QuizError::Cache(format!("corrupt session {}: {}", session_id, e)))
        })
        .transpose()
    }

    async fn save(&self, session: &ActiveSession, ttl: Duration) -> Result<(), QuizError> {
        let mut conn = self.redis.clone();
        let key = session_key(&session.id);
        let json = serde_json::to_string(session).map_err(|e| QuizError::Cache(e.to_string()))?;
        let ttl_secs = ttl.as_secs().max(1);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SETEX")
            .arg(&key)
            .arg(ttl_secs)
            .arg(json)
            .ignore();
        if session.is_finished() {
            pipe.cmd("ZREM").arg(ACTIVE_INDEX).arg(&session.id).ignore();
        } else {
            let expires_at = Utc::now().timestamp() + ttl_secs as i64;
            pipe.cmd("ZADD")
                .arg(ACTIVE_INDEX)
                .arg(expires_at)
                .arg(&session.id)
                .ignore();
        }

        track_cache_operation("setex", async { pipe.query_async::<()>(&mut conn).await }).await?;
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<(), QuizError> {
        let mut conn = self.redis.clone();
        let key = session_key(session_id);
        track_cache_operation("del", async {
            redis::pipe()
                .atomic()
                .cmd("DEL")
                .arg(&key)
                .ignore()
                .cmd("ZREM")
                .arg(ACTIVE_INDEX)
                .arg(session_id)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn active_sessions(&self) -> Result<u64, QuizError> {
        let mut conn = self.redis.clone();
        let now = Utc::now().timestamp();
        let (count,): (u64,) = track_cache_operation("zcard", async {
            redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(ACTIVE_INDEX)
                .arg("-inf")
                .arg(now)
                .ignore()
                .cmd("ZCARD")
                .arg(ACTIVE_INDEX)
                .query_async(&mut conn)
                .await
        })
        .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), QuizError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Session cache kept in process memory, with the same expiry semantics.
#[derive(Default)]
pub struct MemorySessionCache {
    sessions: RwLock<HashMap<String, (ActiveSession, Instant)>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, session_id: &str) -> Result<Option<ActiveSession>, QuizError> {
        let mut sessions = self.sessions.write().await;
        let expired = match sessions.get(session_id) {
            Some((_, expires_at)) => *expires_at <= Instant::now(),
            None => return Ok(None),
        };
        if expired {
            sessions.remove(session_id);
            return Ok(None);
        }
        Ok(sessions.get(session_id).map(|(session, _)| session.clone()))
    }

    async fn save(&self, session: &ActiveSession, ttl: Duration) -> Result<(), QuizError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), (session.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<(), QuizError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn active_sessions(&self) -> Result<u64, QuizError> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(sessions
            .values()
            .filter(|(session, _)| !session.is_finished())
            .count() as u64)
    }

    async fn ping(&self) -> Result<(), QuizError> {
        Ok(())
    }
}
