use async_trait::async_trait;
use thiserror::Error;

/// Custom error type for shared-cache operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// Error establishing or using the cache connection
    #[error("cache connection error: {0}")]
    Connection(String),

    /// Error executing a cache command or pipeline
    #[error("cache command error: {0}")]
    Command(String),

    /// Error decoding a cache reply into the expected shape
    #[error("cache decode error: {0}")]
    Decode(String),
}

/// Result type alias for shared-cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result of one atomic sliding-window round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries inside the window before the candidate member was recorded.
    pub count_before: u64,
    /// Score of the oldest surviving entry in milliseconds, if any. The
    /// candidate member counts as a surviving entry.
    pub oldest_score: Option<u64>,
}

/// SharedCache defines the port for the distributed key-value cache.
///
/// The cache is the only globally mutable store the request path consults:
/// tenant lookups, rate-limit windows, circuit-breaker state and health
/// records all live here and survive process restarts. All values are UTF-8
/// strings and all TTLs are in seconds.
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    /// Read a string value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write a string value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()>;

    /// Delete a key.
    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Atomically: evict window members scored strictly below `evict_below`,
    /// count the survivors, record `member` at `score`, refresh the key TTL
    /// and read the oldest surviving score.
    ///
    /// Implementations MUST execute this as a single atomic pipeline so that
    /// concurrent callers observe window-exact counts.
    async fn window_record(
        &self,
        key: &str,
        evict_below: u64,
        member: &str,
        score: u64,
        ttl_secs: u64,
    ) -> CacheResult<WindowSnapshot>;

    /// Remove a single member from a window set (denial rollback).
    async fn window_remove(&self, key: &str, member: &str) -> CacheResult<()>;

    /// Round-trip liveness check.
    async fn ping(&self) -> CacheResult<()>;
}
