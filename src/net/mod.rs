// src/net/mod.rs

//! Resilient network access: circuit breaker, rate limiter, retrying fetcher.

pub mod circuit;
pub mod fetch;
pub mod rate;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState};
pub use fetch::{ExpectedFormat, Fetcher, HttpTransport, RetryPolicy, Transport, TransportResponse};
pub use rate::RateLimiter;
