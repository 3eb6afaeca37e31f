//! Retry executor for fallible async operations.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - The sleep before retry `i` (0-based) is `base_delay * multiplier^i`, capped at `max_delay`,
//!   then jittered by up to `± jitter_fraction` and clamped back into `[0, max_delay]`.
//! - A retry predicate decides which failures are worth another attempt. By default only
//!   [`ResilienceError::Inner`] and [`ResilienceError::Timeout`] are; everything else is returned
//!   unchanged on first sight.
//! - When every attempt fails the result is [`ResilienceError::RetryExhausted`] carrying the
//!   last failure. Earlier failures are dropped.
//! - The sleeper controls how delays are applied (production uses `TokioSleeper`; tests can
//!   inject `InstantSleeper`/`TrackingSleeper`).
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use bulwark::{InstantSleeper, ResilienceError, RetryConfig, RetryExecutor};
//!
//! #[derive(Debug)]
//! struct MyErr;
//! impl std::fmt::Display for MyErr { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "oops") } }
//! impl std::error::Error for MyErr {}
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = RetryConfig::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(100))
//!     .build()
//!     .unwrap();
//! let retry = RetryExecutor::new("fetch-profile", config).with_sleeper(InstantSleeper);
//! let result: Result<(), ResilienceError<MyErr>> =
//!     retry.execute(|| async { Err(ResilienceError::Inner(MyErr)) }).await;
//! assert!(result.unwrap_err().is_retry_exhausted());
//! # });
//! ```

use crate::backoff::{clamp_nanos, Backoff};
use crate::jitter::Jitter;
use crate::telemetry::{Component, EventKind, EventSink, NullSink, ResilienceEvent};
use crate::{ConfigError, ResilienceError, Sleeper, TokioSleeper};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Validated retry schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
        jitter_fraction: f64,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(max_attempts));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier(backoff_multiplier));
        }
        if !(0.0..=1.0).contains(&jitter_fraction) {
            return Err(ConfigError::InvalidJitterFraction(jitter_fraction));
        }
        if max_delay < base_delay {
            return Err(ConfigError::MaxDelayBelowBase { base: base_delay, max: max_delay });
        }
        Ok(Self { max_attempts, base_delay, backoff_multiplier, max_delay, jitter_fraction })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.backoff_multiplier, self.max_delay)
    }

    pub fn jitter(&self) -> Jitter {
        Jitter::proportional(self.jitter_fraction)
    }

    /// Delay slept before retry `retry` (0-based), always within `[0, max_delay]`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.delay_for_with_rng(retry, &mut rand::rng())
    }

    /// [`delay_for`](Self::delay_for) with a caller-supplied RNG.
    pub fn delay_for_with_rng<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let jittered = self.jitter().apply_with_rng(self.backoff().delay(retry), rng);
        clamp_nanos(jittered.as_nanos() as f64, self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.1,
        }
    }
}

/// Builder for [`RetryConfig`]; starts from the defaults and validates on `build`.
#[derive(Debug, Clone)]
pub struct RetryConfigBuilder {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay: defaults.base_delay,
            backoff_multiplier: defaults.backoff_multiplier,
            max_delay: defaults.max_delay,
            jitter_fraction: defaults.jitter_fraction,
        }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// `0.0` disables jitter.
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        RetryConfig::new(
            self.max_attempts,
            self.base_delay,
            self.backoff_multiplier,
            self.max_delay,
            self.jitter_fraction,
        )
    }
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&ResilienceError<E>) -> bool + Send + Sync>;

/// Runs an operation up to `max_attempts` times with backoff between attempts.
pub struct RetryExecutor<E> {
    name: Arc<str>,
    config: RetryConfig,
    retry_if: RetryPredicate<E>,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            retry_if: self.retry_if.clone(),
            sleeper: self.sleeper.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("sleeper", &self.sleeper)
            .field("retry_if", &"<predicate>")
            .finish()
    }
}

impl<E> RetryExecutor<E>
where
    E: fmt::Display + 'static,
{
    pub fn new(name: impl Into<Arc<str>>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            retry_if: Arc::new(ResilienceError::<E>::is_transient),
            sleeper: Arc::new(TokioSleeper),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Replace the retry predicate. Failures for which it returns `false` are handed back
    /// unchanged without further attempts.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        self.run(None, operation).await
    }

    /// Like [`execute`](Self::execute), but gives up with `Cancelled` as soon as `token` fires
    /// before an attempt or during a backoff sleep. A running attempt is not interrupted.
    pub async fn execute_with_cancel<T, Fut, Op>(
        &self,
        token: &CancellationToken,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        self.run(Some(token), operation).await
    }

    async fn run<T, Fut, Op>(
        &self,
        token: Option<&CancellationToken>,
        mut operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        let mut attempt: u32 = 0;
        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(self.cancelled(attempt));
            }
            attempt += 1;

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.retry_if)(&err) {
                tracing::debug!(name = %self.name, attempt, kind = %err.kind(), "retry: failure not retryable");
                return Err(err);
            }

            if attempt >= self.config.max_attempts {
                tracing::warn!(name = %self.name, attempts = attempt, error = %err, "retry exhausted");
                if self.sink.enabled() {
                    self.sink.emit(
                        &ResilienceEvent::new(Component::Retry, self.name.clone(), EventKind::RetryExhausted)
                            .with_attempt(attempt)
                            .with_cause(&err),
                    );
                }
                return Err(ResilienceError::retry_exhausted(attempt, err));
            }

            let delay = self.config.delay_for(attempt - 1);
            tracing::warn!(name = %self.name, attempt, delay = ?delay, error = %err, "retrying after failure");
            if self.sink.enabled() {
                self.sink.emit(
                    &ResilienceEvent::new(Component::Retry, self.name.clone(), EventKind::RetryAttempt)
                        .with_attempt(attempt)
                        .with_duration(delay)
                        .with_cause(&err),
                );
            }

            match token {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(self.cancelled(attempt)),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                None => self.sleeper.sleep(delay).await,
            }
        }
    }

    fn cancelled(&self, attempts: u32) -> ResilienceError<E> {
        tracing::debug!(name = %self.name, attempts, "retry cancelled by caller");
        if self.sink.enabled() {
            self.sink.emit(
                &ResilienceEvent::new(Component::Retry, self.name.clone(), EventKind::Cancelled)
                    .with_attempt(attempts),
            );
        }
        ResilienceError::Cancelled
    }
}
