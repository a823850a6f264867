use crate::config::RetrySettings;
use crate::error::ForgeFlowError;
use crate::Result;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Share of the capped base delay that jitter may add on top
const JITTER_RATIO: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// A single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay,
            max_delay: settings.max_delay,
            multiplier: settings.backoff_factor,
            jitter: settings.jitter,
        }
    }

    /// `min(initial_delay * multiplier^(attempt-1), max_delay)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Backoff to sleep after failed `attempt`, including jitter when enabled
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let spread = base.as_secs_f64() * JITTER_RATIO;
        base + Duration::from_secs_f64(rand::rng().random_range(0.0..=spread))
    }

    /// Run `op` until it succeeds, fails fatally, or exhausts `max_attempts`.
    /// `op` receives the 1-based attempt number. Cancellation aborts both an
    /// in-flight attempt and a pending backoff sleep.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> (Result<T>, RetryStats)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut stats = RetryStats::default();

        loop {
            stats.attempts += 1;
            let attempt = stats.attempts;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ForgeFlowError::Cancelled),
                result = op(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}", attempt);
                    }
                    return (Ok(value), stats);
                }
                Err(error) => error,
            };

            if error.is_cancelled() {
                return (Err(error), stats);
            }

            if !error.is_retryable() {
                debug!("Non-retryable error on attempt {}: {}", attempt, error);
                return (Err(error), stats);
            }

            if attempt >= self.max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return (Err(error), stats);
            }

            let delay = self.delay_for(attempt);
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, self.max_attempts, error, delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return (Err(ForgeFlowError::Cancelled), stats),
                _ = tokio::time::sleep(delay) => {}
            }
            stats.total_delay += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let p = policy(10);
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(5), Duration::from_secs(10));
        assert_eq!(p.delay_for(500), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let p = RetryPolicy {
            jitter: true,
            ..policy(5)
        };
        for attempt in 1..=6 {
            let base = p.base_delay(attempt);
            let delay = p.delay_for(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base.mul_f64(JITTER_RATIO) + Duration::from_nanos(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let (result, stats) = policy(5)
            .run(&cancel, move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ForgeFlowError::transient("503 Service Unavailable"))
                } else {
                    Ok("payload")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "payload");
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.total_delay, Duration::from_secs(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let (result, stats) = policy(5)
            .run(&cancel, move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ForgeFlowError::fatal("401 Unauthorized"))
            })
            .await;

        assert!(matches!(result, Err(ForgeFlowError::Connector { retryable: false, .. })));
        assert_eq!(stats.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_max() {
        for max in 1..=4 {
            let counter = AtomicU32::new(0);
            let calls = &counter;
            let cancel = CancellationToken::new();
            let (result, stats) = policy(max)
                .run(&cancel, move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ForgeFlowError::Timeout("fetch".to_string()))
                })
                .await;

            assert!(matches!(result, Err(ForgeFlowError::Timeout(_))));
            assert_eq!(stats.attempts, max);
            assert_eq!(calls.load(Ordering::SeqCst), max);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cancel.cancel();
            })
        };

        let (result, stats) = policy(5)
            .run(&cancel, move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ForgeFlowError::transient("connection reset"))
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(ForgeFlowError::Cancelled)));
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.total_delay, Duration::ZERO);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
