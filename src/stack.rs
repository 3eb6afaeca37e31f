//! Resilience stack builder for composing executors.
//!
//! Executors are independent; this type only nests whichever ones were configured, in a fixed
//! order (innermost to outermost):
//!
//! ```text
//! operation → Timeout → Bulkhead → CircuitBreaker → RateLimiter → Retry
//! ```
//!
//! Each attempt is bounded by the timeout, holds a bulkhead permit only while it runs, and is
//! reported to the circuit breaker as one outcome. Retry sits outside everything so that its
//! predicate sees the failure kind of every inner layer; with the default predicate a
//! `CircuitOpen`, `BulkheadFull` or `RateLimitExceeded` stops retrying immediately.
//!
//! Nothing prevents nesting a stack inside another stack's operation. Doing so multiplies
//! attempts.

use crate::{BulkheadExecutor, CircuitBreaker, RateLimiter, ResilienceError, RetryExecutor, TimeoutExecutor};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub struct ResilienceStack<E> {
    timeout: Option<TimeoutExecutor>,
    bulkhead: Option<BulkheadExecutor>,
    circuit_breaker: Option<CircuitBreaker>,
    rate_limiter: Option<RateLimiter>,
    retry: Option<RetryExecutor<E>>,
}

impl<E> Clone for ResilienceStack<E> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout.clone(),
            bulkhead: self.bulkhead.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            rate_limiter: self.rate_limiter.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<E> fmt::Debug for ResilienceStack<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceStack")
            .field("timeout", &self.timeout)
            .field("bulkhead", &self.bulkhead)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("rate_limiter", &self.rate_limiter)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<E> Default for ResilienceStack<E> {
    /// A stack with no layers; `execute` just runs the operation.
    fn default() -> Self {
        ResilienceStackBuilder::new().build()
    }
}

impl<E> ResilienceStack<E> {
    pub fn builder() -> ResilienceStackBuilder<E> {
        ResilienceStackBuilder::new()
    }

    pub fn timeout(&self) -> Option<&TimeoutExecutor> {
        self.timeout.as_ref()
    }

    pub fn bulkhead(&self) -> Option<&BulkheadExecutor> {
        self.bulkhead.as_ref()
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.circuit_breaker.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn retry(&self) -> Option<&RetryExecutor<E>> {
        self.retry.as_ref()
    }
}

impl<E> ResilienceStack<E>
where
    E: fmt::Display + 'static,
{
    /// Run `operation` through every configured layer. `operation` is called once per attempt.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: Fn() -> Fut,
    {
        self.run(None, operation).await
    }

    /// Like [`execute`](Self::execute), but `token` reaches every layer that waits: a backoff
    /// sleep, a bulkhead queue or a running deadline ends with `Cancelled` once it fires.
    pub async fn execute_with_cancel<T, Fut, Op>(
        &self,
        token: &CancellationToken,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: Fn() -> Fut,
    {
        self.run(Some(token), operation).await
    }

    async fn run<T, Fut, Op>(
        &self,
        token: Option<&CancellationToken>,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: Fn() -> Fut,
    {
        let operation = &operation;
        let attempt = move || self.attempt(token, operation);
        match (&self.retry, token) {
            (Some(retry), Some(token)) => retry.execute_with_cancel(token, attempt).await,
            (Some(retry), None) => retry.execute(attempt).await,
            (None, _) => attempt().await,
        }
    }

    async fn attempt<T, Fut, Op>(
        &self,
        token: Option<&CancellationToken>,
        operation: &Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: Fn() -> Fut,
    {
        let timed = move || async move {
            match (&self.timeout, token) {
                (Some(timeout), Some(token)) => timeout.execute_with_cancel(token, operation).await,
                (Some(timeout), None) => timeout.execute(operation).await,
                (None, _) => operation().await,
            }
        };
        let isolated = move || async move {
            match (&self.bulkhead, token) {
                (Some(bulkhead), Some(token)) => bulkhead.execute_with_cancel(token, timed).await,
                (Some(bulkhead), None) => bulkhead.execute(timed).await,
                (None, _) => timed().await,
            }
        };
        let guarded = move || async move {
            match &self.circuit_breaker {
                Some(breaker) => breaker.execute(isolated).await,
                None => isolated().await,
            }
        };

        match &self.rate_limiter {
            Some(limiter) => limiter.execute(guarded).await,
            None => guarded().await,
        }
    }
}

/// Collects the layers of a [`ResilienceStack`]. Every layer is optional.
pub struct ResilienceStackBuilder<E> {
    timeout: Option<TimeoutExecutor>,
    bulkhead: Option<BulkheadExecutor>,
    circuit_breaker: Option<CircuitBreaker>,
    rate_limiter: Option<RateLimiter>,
    retry: Option<RetryExecutor<E>>,
}

impl<E> ResilienceStackBuilder<E> {
    pub fn new() -> Self {
        Self { timeout: None, bulkhead: None, circuit_breaker: None, rate_limiter: None, retry: None }
    }

    pub fn timeout(mut self, timeout: TimeoutExecutor) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn bulkhead(mut self, bulkhead: BulkheadExecutor) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    /// Clones of a breaker share state, so passing a clone keeps the caller's handle live.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn retry(mut self, retry: RetryExecutor<E>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> ResilienceStack<E> {
        ResilienceStack {
            timeout: self.timeout,
            bulkhead: self.bulkhead,
            circuit_breaker: self.circuit_breaker,
            rate_limiter: self.rate_limiter,
            retry: self.retry,
        }
    }
}

impl<E> Default for ResilienceStackBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
