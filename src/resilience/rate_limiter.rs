use crate::config::RateLimitSettings;
use crate::error::ForgeFlowError;
use crate::Result;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct WindowState {
    /// Set by the first admission of a window
    window_start: Option<Instant>,
    count: u32,
}

impl WindowState {
    fn roll(&mut self, now: Instant, window: Duration) {
        if let Some(start) = self.window_start {
            if now.duration_since(start) >= window {
                self.window_start = None;
                self.count = 0;
            }
        }
    }

    fn admit(&mut self, now: Instant) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.count += 1;
    }

    fn remaining(&self, now: Instant, window: Duration) -> Duration {
        match self.window_start {
            Some(start) => (start + window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateLimiterStats {
    pub admitted: u64,
    pub delayed: u64,
    pub rejected: u64,
    pub total_wait: Duration,
}

/// Window admission control: at most `max_requests` admissions per `window`,
/// with the window opened by the first request and closed `window` later.
///
/// The state lock is held while a caller sleeps for capacity, so concurrent
/// `acquire` calls queue behind it instead of both observing the last slot.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<WindowState>,
    /// When the caller sleeping under the state lock wakes up
    waking_at: parking_lot::Mutex<Option<Instant>>,
    stats: parking_lot::Mutex<RateLimiterStats>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(ForgeFlowError::InvalidConfig(
                "rate_limit.calls must be greater than 0".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(ForgeFlowError::InvalidConfig(
                "rate_limit.period must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            window,
            state: Mutex::new(WindowState::default()),
            waking_at: parking_lot::Mutex::new(None),
            stats: parking_lot::Mutex::new(RateLimiterStats::default()),
        })
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self> {
        Self::new(settings.calls, settings.period)
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait for a slot in the current window. Returns how long the caller was suspended.
    pub async fn acquire(&self) -> Duration {
        let mut state = self.state.lock().await;
        // Left behind when a sleeping caller was dropped
        *self.waking_at.lock() = None;
        let mut now = Instant::now();
        state.roll(now, self.window);

        let mut waited = Duration::ZERO;
        if state.count >= self.max_requests {
            waited = state.remaining(now, self.window);
            debug!(
                "Rate limit of {} per {:?} reached, waiting {:?}",
                self.max_requests, self.window, waited
            );
            *self.waking_at.lock() = Some(now + waited);
            tokio::time::sleep(waited).await;
            *self.waking_at.lock() = None;
            now = Instant::now();
            state.window_start = None;
            state.count = 0;
        }

        state.admit(now);

        let mut stats = self.stats.lock();
        stats.admitted += 1;
        if !waited.is_zero() {
            stats.delayed += 1;
            stats.total_wait += waited;
        }
        waited
    }

    /// Admit without waiting, or fail with the time until the window reopens.
    ///
    /// While a blocking caller holds the lock, `retry_after` is the time until
    /// that caller wakes. It takes the reopened window's first slot, so a retry
    /// at that point can still be rejected.
    pub fn try_acquire(&self) -> Result<()> {
        let Ok(mut state) = self.state.try_lock() else {
            self.stats.lock().rejected += 1;
            let retry_after = (*self.waking_at.lock())
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::ZERO);
            return Err(ForgeFlowError::RateLimitExceeded { retry_after });
        };

        let now = Instant::now();
        state.roll(now, self.window);
        if state.count >= self.max_requests {
            self.stats.lock().rejected += 1;
            return Err(ForgeFlowError::RateLimitExceeded {
                retry_after: state.remaining(now, self.window),
            });
        }

        state.admit(now);
        self.stats.lock().admitted += 1;
        Ok(())
    }

    pub fn stats(&self) -> RateLimiterStats {
        self.stats.lock().clone()
    }
}
