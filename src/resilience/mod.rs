//! Resilience layer
//!
//! Per-dependency retry with capped backoff, rolling-window circuit breakers,
//! and an optional fallback path, composed as circuit-breaker(retry(operation)).

mod circuit;
mod executor;
mod retry;

pub use circuit::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use executor::ResilienceExecutor;
pub use retry::RetryPolicy;
