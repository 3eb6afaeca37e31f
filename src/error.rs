//! Error types shared by every executor.
//!
//! Failures are reported by kind rather than by type hierarchy: callers match on
//! [`ResilienceError`] (or its [`FailureKind`]) to decide whether to retry elsewhere, fall back to
//! cached data, or surface the failure. Configuration mistakes are a separate type,
//! [`ConfigError`], and only ever surface at construction time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Unified failure type returned by every executor.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The wrapped operation failed on its own; passed through unmodified.
    Inner(E),
    /// Every attempt failed. Only the last failure is kept; earlier ones are discarded.
    RetryExhausted { attempts: u32, cause: Box<ResilienceError<E>> },
    /// The circuit breaker guarding `name` rejected the call without running it.
    CircuitOpen { name: Arc<str> },
    /// The operation did not finish within `duration`.
    Timeout { duration: Duration },
    /// No bulkhead permit became free in time.
    BulkheadFull { max_concurrent: usize },
    /// The token bucket was empty.
    RateLimitExceeded { capacity: u32, period: Duration },
    /// The caller's own cancellation token fired.
    Cancelled,
}

/// Discriminant of [`ResilienceError`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Inner,
    RetryExhausted,
    CircuitOpen,
    Timeout,
    BulkheadFull,
    RateLimitExceeded,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Inner => "inner",
            FailureKind::RetryExhausted => "retry_exhausted",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Timeout => "timeout",
            FailureKind::BulkheadFull => "bulkhead_full",
            FailureKind::RateLimitExceeded => "rate_limit_exceeded",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner(e) => write!(f, "{}", e),
            Self::RetryExhausted { attempts, cause } => {
                write!(f, "retry exhausted after {} attempts; last error: {}", attempts, cause)
            }
            Self::CircuitOpen { name } => write!(f, "circuit breaker '{}' is open", name),
            Self::Timeout { duration } => write!(f, "operation timed out after {:?}", duration),
            Self::BulkheadFull { max_concurrent } => {
                write!(f, "bulkhead full ({} concurrent calls allowed)", max_concurrent)
            }
            Self::RateLimitExceeded { capacity, period } => {
                write!(f, "rate limit exceeded ({} calls per {:?})", capacity, period)
            }
            Self::Cancelled => write!(f, "operation cancelled by caller"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Wrap the last failure observed by a retry loop.
    pub fn retry_exhausted(attempts: u32, cause: ResilienceError<E>) -> Self {
        Self::RetryExhausted { attempts, cause: Box::new(cause) }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Inner(_) => FailureKind::Inner,
            Self::RetryExhausted { .. } => FailureKind::RetryExhausted,
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::BulkheadFull { .. } => FailureKind::BulkheadFull,
            Self::RateLimitExceeded { .. } => FailureKind::RateLimitExceeded,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Failures worth another attempt: the operation's own errors and timeouts.
    ///
    /// Rejections produced by a protecting executor (open circuit, full bulkhead, empty bucket)
    /// will keep rejecting, and a cancelled caller no longer wants the result.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Inner(_) | Self::Timeout { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_bulkhead_full(&self) -> bool {
        matches!(self, Self::BulkheadFull { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an `Inner` variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// The last failure behind a `RetryExhausted`.
    pub fn cause(&self) -> Option<&ResilienceError<E>> {
        match self {
            Self::RetryExhausted { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Follow `RetryExhausted` causes down to the first failure that is not a retry wrapper.
    pub fn root_cause(&self) -> &ResilienceError<E> {
        let mut current = self;
        while let Self::RetryExhausted { cause, .. } = current {
            current = cause;
        }
        current
    }
}

/// Invalid executor configuration, reported at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_attempts must be >= 1 (got {0})")]
    InvalidMaxAttempts(u32),
    #[error("backoff_multiplier must be finite and >= 1.0 (got {0})")]
    InvalidBackoffMultiplier(f64),
    #[error("jitter_fraction must be within 0.0..=1.0 (got {0})")]
    InvalidJitterFraction(f64),
    #[error("max_delay ({max:?}) must be >= base_delay ({base:?})")]
    MaxDelayBelowBase { base: Duration, max: Duration },
    #[error("failure_threshold must be >= 1 (got {0})")]
    InvalidFailureThreshold(u32),
    #[error("success_threshold must be >= 1 (got {0})")]
    InvalidSuccessThreshold(u32),
    #[error("open_timeout must be > 0")]
    ZeroOpenTimeout,
    #[error("half_open_max_calls must be >= 1 when set (got {0})")]
    InvalidHalfOpenLimit(usize),
    #[error("timeout duration must be > 0")]
    ZeroTimeout,
    #[error("max_concurrent must be between 1 and {max} (got {provided})")]
    InvalidMaxConcurrent { provided: usize, max: usize },
    #[error("rate limit capacity must be >= 1 (got {0})")]
    InvalidCapacity(u32),
    #[error("refill_period must be > 0")]
    ZeroRefillPeriod,
}
