//! Structured events emitted by the executors.
//!
//! Every event names the [`Component`] and instance that produced it plus an [`EventKind`].
//! Attempt number, duration and failure cause are attached only where they mean something.
//! `Display` renders a compact `component[name]::kind key=value` line for log sinks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which executor produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Retry,
    CircuitBreaker,
    Timeout,
    Bulkhead,
    RateLimiter,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Component::Retry => "retry",
            Component::CircuitBreaker => "circuit_breaker",
            Component::Timeout => "timeout",
            Component::Bulkhead => "bulkhead",
            Component::RateLimiter => "rate_limiter",
        };
        f.write_str(label)
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An attempt failed and another will follow after `duration`.
    RetryAttempt,
    /// The final attempt failed.
    RetryExhausted,
    /// Closed or HalfOpen → Open.
    CircuitOpened,
    /// Open → HalfOpen.
    CircuitHalfOpen,
    /// HalfOpen → Closed.
    CircuitClosed,
    /// A call was refused because the circuit is open (or half-open probes are saturated).
    CircuitRejected,
    TimeoutElapsed,
    BulkheadAcquired,
    BulkheadRejected,
    RateLimited,
    /// The caller's cancellation token fired while the executor was waiting.
    Cancelled,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventKind::RetryAttempt => "retry_attempt",
            EventKind::RetryExhausted => "retry_exhausted",
            EventKind::CircuitOpened => "circuit_opened",
            EventKind::CircuitHalfOpen => "circuit_half_open",
            EventKind::CircuitClosed => "circuit_closed",
            EventKind::CircuitRejected => "circuit_rejected",
            EventKind::TimeoutElapsed => "timeout_elapsed",
            EventKind::BulkheadAcquired => "bulkhead_acquired",
            EventKind::BulkheadRejected => "bulkhead_rejected",
            EventKind::RateLimited => "rate_limited",
            EventKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Structured event emitted by an executor.
///
/// `attempt`, `duration` and `cause` are filled in where they mean something: retry events carry
/// the attempt number, the delay and the failure; timeout events carry the configured limit;
/// bulkhead waits carry how long the caller waited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceEvent {
    pub component: Component,
    pub name: Arc<str>,
    pub kind: EventKind,
    pub attempt: Option<u32>,
    pub duration: Option<Duration>,
    pub cause: Option<String>,
}

impl ResilienceEvent {
    pub fn new(component: Component, name: Arc<str>, kind: EventKind) -> Self {
        Self { component, name, kind, attempt: None, duration: None, cause: None }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl fmt::Display for ResilienceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]::{}", self.component, self.name, self.kind)?;
        if let Some(attempt) = self.attempt {
            write!(f, " attempt={}", attempt)?;
        }
        if let Some(duration) = self.duration {
            write!(f, " duration={:?}", duration)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " cause=\"{}\"", cause)?;
        }
        Ok(())
    }
}
