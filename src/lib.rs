#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bulwark
//!
//! In-process resilience for async Rust: composable wrappers that protect calls to unreliable
//! dependencies (networks, databases, external services) from cascading or resource-exhausting
//! failure.
//!
//! ## Executors
//!
//! - [`RetryExecutor`]: exponential backoff with proportional jitter and a retry predicate
//! - [`CircuitBreaker`]: Closed / Open / HalfOpen state machine keyed by a resource name
//! - [`TimeoutExecutor`]: races the operation against a deadline
//! - [`BulkheadExecutor`]: semaphore-bounded concurrency with a bounded wait
//! - [`RateLimiter`]: lazily refilled token bucket
//!
//! Every executor wraps a no-argument operation returning
//! `Result<T, ResilienceError<E>>` and reports failures by kind through [`ResilienceError`].
//! Executors are `Send + Sync`, and clones share state.
//!
//! ## Composition
//!
//! Executors are independent and nest freely. The recommended order, innermost to outermost,
//! is:
//!
//! ```text
//! Timeout → Bulkhead → CircuitBreaker → RateLimiter → Retry
//! ```
//!
//! [`ResilienceStack`] builds exactly that, and [`ResilienceLayer`] exposes it as tower
//! middleware.
//!
//! ## Quick Start
//!
//! ```rust
//! use bulwark::{
//!     CircuitBreaker, CircuitBreakerConfig, ResilienceError, ResilienceStack, RetryConfig,
//!     RetryExecutor, TimeoutConfig, TimeoutExecutor,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stack = ResilienceStack::<std::io::Error>::builder()
//!         .timeout(TimeoutExecutor::new("profile", TimeoutConfig::new(Duration::from_secs(2))?))
//!         .circuit_breaker(CircuitBreaker::new("profile", CircuitBreakerConfig::default()))
//!         .retry(RetryExecutor::new("profile", RetryConfig::builder().max_attempts(3).build()?))
//!         .build();
//!
//!     let result = stack
//!         .execute(|| async {
//!             // Your async operation here
//!             Ok::<_, ResilienceError<std::io::Error>>("profile")
//!         })
//!         .await;
//!     assert_eq!(result?, "profile");
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod jitter;
pub mod layer;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod stack;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use backoff::Backoff;
pub use bulkhead::{BulkheadConfig, BulkheadExecutor};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{ConfigError, FailureKind, ResilienceError};
pub use jitter::Jitter;
pub use layer::{ResilienceLayer, ResilienceService};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryConfigBuilder, RetryExecutor};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use telemetry::{
    Component, EventKind, EventSink, FanoutSink, LogSink, MemorySink, NullSink, ResilienceEvent,
    ServiceSink,
};
pub use timeout::{TimeoutConfig, TimeoutExecutor};
pub use tokio_util::sync::CancellationToken;
