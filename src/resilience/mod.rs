pub mod circuit_breaker;
pub mod fetch;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use fetch::{canonicalize, fingerprint, ResilientFetch};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use retry::{RetryPolicy, RetryStats};
