use crate::types::Payload;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// TTL key/value store for fetch results. Keys are opaque fingerprints
/// computed by the caller; the store never interprets them.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Live value for `key`, or `None` on a miss or an expired entry
    async fn get(&self, key: &str) -> Result<Option<Payload>>;
    async fn set(&self, key: &str, value: Payload, ttl: Duration) -> Result<()>;
    async fn evict(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn size(&self) -> Result<usize>;
}
