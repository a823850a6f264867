use crate::etl::traits::Connector;
use crate::error::ForgeFlowError;
use crate::resilience::{CircuitBreaker, RateLimiter, RetryPolicy};
use crate::storage::Cache;
use crate::types::{FetchReport, Payload};
use crate::Result;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Recursively sort mapping keys so equal parameters serialize identically
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex digest of the canonical JSON form of `params`
pub fn fingerprint(params: &Value) -> String {
    let canonical = canonicalize(params).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Decorates `Connector::fetch` with cache lookup, circuit breaker, rate
/// limiting and retry, in that order.
///
/// A cache hit returns before any breaker, limiter or retry accounting. Otherwise
/// every upstream attempt takes one limiter slot, and a successful payload is cached.
/// The breaker sees one outcome per fetch, after retries are exhausted.
#[derive(Clone)]
pub struct ResilientFetch {
    cache: Option<(Arc<dyn Cache>, Duration)>,
    breaker: Option<Arc<CircuitBreaker>>,
    limiter: Option<Arc<RateLimiter>>,
    wait_for_capacity: bool,
    retry: RetryPolicy,
}

impl Default for ResilientFetch {
    fn default() -> Self {
        Self::new(RetryPolicy::none())
    }
}

impl ResilientFetch {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            cache: None,
            breaker: None,
            limiter: None,
            wait_for_capacity: true,
            retry,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        self.cache = Some((cache, ttl));
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// With `wait = false` a full window fails the attempt with `RateLimitExceeded`
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>, wait: bool) -> Self {
        self.limiter = Some(limiter);
        self.wait_for_capacity = wait;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn fetch(
        &self,
        connector: &dyn Connector,
        cancel: &CancellationToken,
    ) -> (Result<Payload>, FetchReport) {
        let key = fingerprint(&connector.fingerprint_params());
        let mut report = FetchReport {
            fingerprint: key.clone(),
            ..Default::default()
        };

        if let Some((cache, _)) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(payload)) => {
                    debug!("Cache hit for {} connector ({})", connector.kind(), &key[..12]);
                    report.from_cache = true;
                    return (Ok(payload), report);
                }
                Ok(None) => debug!("Cache miss for {} connector ({})", connector.kind(), &key[..12]),
                Err(e) => warn!("Cache lookup failed, treating as miss: {}", e),
            }
        }

        if let Some(breaker) = &self.breaker {
            if let Err(e) = breaker.check() {
                warn!("Skipping {} connector: {}", connector.kind(), e);
                return (Err(e), report);
            }
        }

        let waited_nanos = AtomicU64::new(0);
        let waited = &waited_nanos;
        let limiter = self.limiter.as_deref();
        let wait_for_capacity = self.wait_for_capacity;

        let (result, stats) = self
            .retry
            .run(cancel, move |attempt| async move {
                if let Some(limiter) = limiter {
                    if wait_for_capacity {
                        let wait = limiter.acquire().await;
                        if !wait.is_zero() {
                            debug!("Attempt {} waited {:?} for rate limit capacity", attempt, wait);
                        }
                        waited.fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
                    } else {
                        limiter.try_acquire()?;
                    }
                }
                connector.fetch().await
            })
            .await;

        report.attempts = stats.attempts;
        report.total_backoff = stats.total_delay;
        report.rate_limit_wait = Duration::from_nanos(waited_nanos.load(Ordering::Relaxed));

        if let Some(breaker) = &self.breaker {
            match &result {
                Ok(_) => breaker.record_success(),
                Err(ForgeFlowError::Cancelled | ForgeFlowError::RateLimitExceeded { .. }) => {}
                Err(_) => breaker.record_failure(),
            }
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => return (Err(e), report),
        };

        if let Some((cache, ttl)) = &self.cache {
            if let Err(e) = cache.set(&key, payload.clone(), *ttl).await {
                warn!("Failed to cache fetch result: {}", e);
            }
        }

        (Ok(payload), report)
    }
}
