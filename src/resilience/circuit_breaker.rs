use crate::config::CircuitBreakerSettings;
use crate::error::ForgeFlowError;
use crate::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Stops calling an upstream after `failure_threshold` consecutive failed
/// fetches. Once `recovery_timeout` has passed the next fetch is let through
/// half-open: success closes the circuit, failure opens it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Result<Self> {
        if failure_threshold == 0 {
            return Err(ForgeFlowError::InvalidConfig(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if recovery_timeout.is_zero() {
            return Err(ForgeFlowError::InvalidConfig(
                "circuit_breaker.recovery_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            failure_threshold,
            recovery_timeout,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        })
    }

    pub fn from_settings(settings: &CircuitBreakerSettings) -> Result<Self> {
        Self::new(settings.failure_threshold, settings.recovery_timeout)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Admit a fetch, or fail with a non-retryable connector error while open
    pub fn check(&self) -> Result<()> {
        let mut breaker = self.state.lock();
        if breaker.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = breaker.opened_at.map(|at| at.elapsed()).unwrap_or_default();
        if elapsed >= self.recovery_timeout {
            breaker.state = CircuitState::HalfOpen;
            info!("Circuit breaker half-open after {:?}", elapsed);
            return Ok(());
        }

        Err(ForgeFlowError::fatal(format!(
            "circuit breaker is open after {} consecutive failures, retry after {:?}",
            breaker.consecutive_failures,
            self.recovery_timeout - elapsed
        )))
    }

    pub fn record_success(&self) {
        let mut breaker = self.state.lock();
        if breaker.state != CircuitState::Closed {
            info!("Circuit breaker closed");
        }
        breaker.state = CircuitState::Closed;
        breaker.consecutive_failures = 0;
        breaker.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut breaker = self.state.lock();
        breaker.consecutive_failures += 1;

        let trips = breaker.state == CircuitState::HalfOpen
            || breaker.consecutive_failures >= self.failure_threshold;
        if trips {
            if breaker.state != CircuitState::Open {
                error!(
                    "Circuit breaker opened after {} consecutive failures (threshold {})",
                    breaker.consecutive_failures, self.failure_threshold
                );
            }
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(Instant::now());
        }
    }
}
