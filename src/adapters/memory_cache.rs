//! In-process implementation of the shared cache.
//!
//! Suitable for development and single-process deployments: state does not
//! survive restarts and is invisible to other gateway processes. The atomic
//! pipeline contract of `window_record` is met by holding the state lock for
//! the whole operation.
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::ports::{CacheError, CacheResult, SharedCache, WindowSnapshot};

#[derive(Debug)]
struct StringEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct WindowSet {
    /// Members ordered by (score, insertion).
    members: Vec<(u64, String)>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct CacheState {
    strings: HashMap<String, StringEntry>,
    windows: HashMap<String, WindowSet>,
}

/// Shared-cache adapter backed by process memory.
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| CacheError::Command("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut state = self.lock()?;
        let expired = match state.strings.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.strings.remove(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut state = self.lock()?;
        state.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut state = self.lock()?;
        state.strings.remove(key);
        state.windows.remove(key);
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
        let mut state = self.lock()?;
        let now = Instant::now();

        let window = state.windows.entry(key.to_string()).or_default();
        if window.expires_at.is_some_and(|deadline| deadline <= now) {
            window.members.clear();
        }

        window.members.retain(|(s, _)| *s >= evict_below);
        let count_before = window.members.len() as u64;

        window.members.push((score, member.to_string()));
        window.members.sort_by_key(|(s, _)| *s);
        window.expires_at = Some(now + Duration::from_secs(ttl_secs));

        let oldest_score = window.members.first().map(|(s, _)| *s);
        Ok(WindowSnapshot {
            count_before,
            oldest_score,
        })
    }

    async fn window_remove(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut state = self.lock()?;
        if let Some(window) = state.windows.get_mut(key) {
            window.members.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
