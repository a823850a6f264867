use crate::{storage::traits::Cache, types::Payload, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Payload,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Recency order, least recently used at the front
    order: VecDeque<String>,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key)
    }
}

/// In-memory TTL cache with least-recently-used eviction once `max_entries` is reached.
///
/// Every state transition happens under a single lock, so a concurrent `get`
/// never observes a half-written entry.
pub struct TtlCache {
    state: Mutex<CacheState>,
    max_entries: usize,
}

impl TtlCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// Periodically purge expired entries until `cancel` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!("Cache sweep purged {} expired entries", purged);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Cache for TtlCache {
    async fn get(&self, key: &str) -> Result<Option<Payload>> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let value = match state.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(entry.value.clone()),
        };

        match value {
            Some(value) => {
                state.touch(key);
                Ok(Some(value))
            }
            None => {
                state.remove(key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Payload, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut state = self.state.lock();

        if !state.entries.contains_key(key) {
            while state.entries.len() >= self.max_entries {
                match state.order.pop_front() {
                    Some(oldest) => {
                        state.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        state.entries.insert(key.to_string(), entry);
        state.touch(key);
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.state.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.state.lock().entries.len())
    }
}
