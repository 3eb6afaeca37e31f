//! Observability for the resilience executors.
//!
//! Every executor reports state transitions and failures as [`ResilienceEvent`]s to an
//! [`EventSink`]. Sinks are synchronous and must not block: the circuit breaker and rate limiter
//! emit from inside their non-suspending hot paths.
//!
//! # Event kinds
//!
//! - **Retry**: `RetryAttempt`, `RetryExhausted`
//! - **Circuit breaker**: `CircuitOpened`, `CircuitHalfOpen`, `CircuitClosed`, `CircuitRejected`
//! - **Timeout**: `TimeoutElapsed`
//! - **Bulkhead**: `BulkheadAcquired`, `BulkheadRejected`
//! - **Rate limiter**: `RateLimited`
//! - **All waiting executors**: `Cancelled`
//!
//! # Sinks
//!
//! [`NullSink`] is the default and drops everything. [`LogSink`] forwards to `tracing`,
//! [`MemorySink`] keeps a bounded buffer for tests, [`FanoutSink`] duplicates events, and
//! [`ServiceSink`] hands events to any `tower::Service` through a bounded queue.

pub mod events;
pub mod sinks;

pub use events::{Component, EventKind, ResilienceEvent};
pub use sinks::{EventSink, FanoutSink, LogSink, MemorySink, NullSink, ServiceSink};
