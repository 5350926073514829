//! Redis implementation of the shared cache.
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::ports::{CacheError, CacheResult, SharedCache, WindowSnapshot};

/// Shared-cache adapter over a multiplexed Redis connection.
///
/// `ConnectionManager` reconnects transparently, so transient broker restarts
/// surface as command errors on in-flight requests only.
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to the Redis instance at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).wrap_err("invalid Redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .wrap_err_with(|| format!("failed to connect to Redis at {url}"))?;
        tracing::info!("connected to Redis shared cache");
        Ok(Self { conn })
    }
}

fn command_error(err: redis::RedisError) -> CacheError {
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        CacheError::Connection(err.to_string())
    } else {
        CacheError::Command(err.to_string())
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(command_error)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(command_error)?;
        Ok(())
    }

    async fn window_record(
        &self,
        key: &str,
        evict_below: u64,
        member: &str,
        score: u64,
        ttl_secs: u64,
    ) -> CacheResult<WindowSnapshot> {
        let mut conn = self.conn.clone();

        // One atomic MULTI/EXEC round-trip: evict, count, record, refresh
        // TTL, read the oldest survivor.
        let (_evicted, count_before, _added, _expire, oldest): (
            i64,
            i64,
            i64,
            i64,
            Vec<(String, f64)>,
        ) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(format!("({evict_below}"))
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(WindowSnapshot {
            count_before: count_before.max(0) as u64,
            oldest_score: oldest.first().map(|(_, s)| *s as u64),
        })
    }

    async fn window_remove(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(key, member).await.map_err(command_error)?;
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Command(format!("unexpected PING reply: {reply}")))
        }
    }
}
