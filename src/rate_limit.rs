//! Token-bucket rate limiting.
//!
//! The bucket holds up to `capacity` tokens and starts full. Each granted call consumes one
//! token. Tokens come back continuously at `capacity / refill_period`, computed lazily from the
//! clock on every check; there is no background timer.
//!
//! A denied call never waits: [`RateLimiter::execute`] returns
//! [`ResilienceError::RateLimitExceeded`] without running the operation. Callers that would
//! rather wait can use [`RateLimiter::time_until_available`] as a retry-after hint.

use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{Component, EventKind, EventSink, NullSink, ResilienceEvent};
use crate::{ConfigError, ResilienceError};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    capacity: u32,
    refill_period: Duration,
}

impl RateLimitConfig {
    /// Allow `capacity` calls per `refill_period`.
    pub fn new(capacity: u32, refill_period: Duration) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        if refill_period.is_zero() {
            return Err(ConfigError::ZeroRefillPeriod);
        }
        Ok(Self { capacity, refill_period })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    /// Tokens earned over `elapsed`, before capping.
    fn refill_for(&self, elapsed: Duration) -> f64 {
        elapsed.as_nanos() as f64 * f64::from(self.capacity) / self.refill_period.as_nanos() as f64
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    name: Arc<str>,
    config: RateLimitConfig,
    bucket: Arc<Mutex<Bucket>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl RateLimiter {
    pub fn new(name: impl Into<Arc<str>>, config: RateLimitConfig) -> Self {
        Self::build(name.into(), config, Arc::new(MonotonicClock::default()))
    }

    /// Override the clock (useful for deterministic tests). Resets the bucket to full.
    pub fn with_clock<C: Clock + 'static>(self, clock: C) -> Self {
        let sink = self.sink;
        Self { sink, ..Self::build(self.name, self.config, Arc::new(clock)) }
    }

    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    fn build(name: Arc<str>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let bucket = Bucket { tokens: f64::from(config.capacity), last_refill: clock.now() };
        Self {
            name,
            config,
            bucket: Arc::new(Mutex::new(bucket)),
            clock,
            sink: Arc::new(NullSink),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one token if available. Never blocks.
    pub fn allow(&self) -> bool {
        let granted = {
            let mut bucket = self.refilled();
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                true
            } else {
                false
            }
        };
        if !granted {
            tracing::debug!(name = %self.name, capacity = self.config.capacity, "rate limit exceeded");
            if self.sink.enabled() {
                self.sink.emit(&ResilienceEvent::new(
                    Component::RateLimiter,
                    self.name.clone(),
                    EventKind::RateLimited,
                ));
            }
        }
        granted
    }

    /// Run `operation` if a token is available.
    ///
    /// # Errors
    /// `RateLimitExceeded` without calling `operation` when the bucket is empty.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        if !self.allow() {
            return Err(ResilienceError::RateLimitExceeded {
                capacity: self.config.capacity,
                period: self.config.refill_period,
            });
        }
        operation().await
    }

    /// Tokens currently in the bucket after refilling. Does not consume.
    pub fn available_tokens(&self) -> f64 {
        self.refilled().tokens
    }

    /// How long until one token is available; zero if one already is.
    pub fn time_until_available(&self) -> Duration {
        let missing = 1.0 - self.refilled().tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        let nanos = missing * self.config.refill_period.as_nanos() as f64 / f64::from(self.config.capacity);
        Duration::from_nanos(nanos.round() as u64)
    }

    fn refilled(&self) -> MutexGuard<'_, Bucket> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let elapsed = now.saturating_sub(bucket.last_refill);
        bucket.last_refill = now;
        let capacity = f64::from(self.config.capacity);
        bucket.tokens = (bucket.tokens + self.config.refill_for(elapsed)).min(capacity);
        bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::telemetry::MemorySink;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn limiter(capacity: u32, period: Duration, clock: &ManualClock) -> RateLimiter {
        RateLimiter::new("api", RateLimitConfig::new(capacity, period).unwrap()).with_clock(clock.clone())
    }

    #[test]
    fn rejects_invalid_config() {
        assert_eq!(
            RateLimitConfig::new(0, Duration::from_secs(1)),
            Err(ConfigError::InvalidCapacity(0))
        );
        assert_eq!(RateLimitConfig::new(1, Duration::ZERO), Err(ConfigError::ZeroRefillPeriod));
    }

    #[test]
    fn starts_full_and_drains() {
        let clock = ManualClock::new();
        let limiter = limiter(5, Duration::from_secs(1), &clock);
        for _ in 0..5 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());
    }

    #[test]
    fn full_period_restores_capacity() {
        let clock = ManualClock::new();
        let limiter = limiter(4, Duration::from_secs(2), &clock);
        while limiter.allow() {}

        clock.advance(Duration::from_secs(2));
        for _ in 0..4 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());
    }

    #[test]
    fn refill_is_proportional_and_capped() {
        let clock = ManualClock::new();
        let limiter = limiter(10, Duration::from_secs(1), &clock);
        while limiter.allow() {}

        clock.advance(Duration::from_millis(250));
        assert!((limiter.available_tokens() - 2.5).abs() < 1e-9);

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.available_tokens(), 10.0);
    }

    #[test]
    fn available_tokens_does_not_consume() {
        let clock = ManualClock::new();
        let limiter = limiter(2, Duration::from_secs(1), &clock);
        assert_eq!(limiter.available_tokens(), 2.0);
        assert_eq!(limiter.available_tokens(), 2.0);
        assert!(limiter.allow());
        assert_eq!(limiter.available_tokens(), 1.0);
    }

    #[test]
    fn time_until_available_reports_refill_wait() {
        let clock = ManualClock::new();
        let limiter = limiter(10, Duration::from_secs(1), &clock);
        assert_eq!(limiter.time_until_available(), Duration::ZERO);
        while limiter.allow() {}
        assert_eq!(limiter.time_until_available(), Duration::from_millis(100));
        clock.advance(Duration::from_millis(40));
        assert_eq!(limiter.time_until_available(), Duration::from_millis(60));
    }

    #[tokio::test]
    async fn execute_skips_operation_when_empty() {
        let clock = ManualClock::new();
        let sink = MemorySink::new();
        let limiter = limiter(1, Duration::from_secs(1), &clock).with_sink(sink.clone());

        let first = limiter.execute(|| async { Ok::<_, ResilienceError<TestError>>(1) }).await;
        assert_eq!(first.unwrap(), 1);

        let mut ran = false;
        let second = limiter
            .execute(|| {
                ran = true;
                async { Ok::<_, ResilienceError<TestError>>(2) }
            })
            .await;

        match second {
            Err(ResilienceError::RateLimitExceeded { capacity, period }) => {
                assert_eq!(capacity, 1);
                assert_eq!(period, Duration::from_secs(1));
            }
            other => panic!("expected RateLimitExceeded, got {:?}", other),
        }
        assert!(!ran);
        assert_eq!(sink.kinds(), vec![EventKind::RateLimited]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_overdraw() {
        let clock = ManualClock::new();
        let limiter = limiter(50, Duration::from_secs(1), &clock);

        let tasks = (0..200).map(|_| {
            let l = limiter.clone();
            tokio::spawn(async move { l.allow() })
        });
        let granted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(granted, 50);
    }
}
