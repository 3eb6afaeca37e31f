//! Bulkhead: caps how many calls run at once against one resource.
//!
//! Permits come from a tokio [`Semaphore`] and are held as RAII guards for the duration of the
//! operation, so they are returned on success, failure, panic, or when the caller drops the
//! future. When the pool is exhausted a caller waits up to `max_wait` for a permit (a zero
//! `max_wait` rejects straight away) and then gets [`ResilienceError::BulkheadFull`]. Waiters
//! are not guaranteed FIFO order.

use crate::telemetry::{Component, EventKind, EventSink, NullSink, ResilienceEvent};
use crate::{ConfigError, ResilienceError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadConfig {
    max_concurrent: usize,
    max_wait: Duration,
}

impl BulkheadConfig {
    /// `max_concurrent` must be between 1 and [`Semaphore::MAX_PERMITS`].
    pub fn new(max_concurrent: usize, max_wait: Duration) -> Result<Self, ConfigError> {
        if max_concurrent == 0 || max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidMaxConcurrent {
                provided: max_concurrent,
                max: Semaphore::MAX_PERMITS,
            });
        }
        Ok(Self { max_concurrent, max_wait })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

#[derive(Debug, Clone)]
pub struct BulkheadExecutor {
    name: Arc<str>,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    sink: Arc<dyn EventSink>,
}

impl BulkheadExecutor {
    pub fn new(name: impl Into<Arc<str>>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let _permit = self.acquire::<E>(None).await?;
        operation().await
    }

    /// Like [`execute`](Self::execute); `token` firing while waiting for a permit yields
    /// `Cancelled`.
    pub async fn execute_with_cancel<T, E, Fut, Op>(
        &self,
        token: &CancellationToken,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let _permit = self.acquire::<E>(Some(token)).await?;
        operation().await
    }

    async fn acquire<E>(
        &self,
        token: Option<&CancellationToken>,
    ) -> Result<SemaphorePermit<'_>, ResilienceError<E>> {
        if token.is_some_and(CancellationToken::is_cancelled) {
            return Err(self.cancelled());
        }
        if let Ok(permit) = self.semaphore.try_acquire() {
            self.acquired(Duration::ZERO);
            return Ok(permit);
        }
        if self.config.max_wait.is_zero() {
            return Err(self.rejected(Duration::ZERO));
        }

        let started = tokio::time::Instant::now();
        let wait = tokio::time::timeout(self.config.max_wait, self.semaphore.acquire());
        let outcome = match token {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(self.cancelled()),
                    outcome = wait => outcome,
                }
            }
            None => wait.await,
        };

        match outcome {
            Ok(Ok(permit)) => {
                self.acquired(started.elapsed());
                Ok(permit)
            }
            // The semaphore is never closed, but treat closure like exhaustion.
            Ok(Err(_)) | Err(_) => Err(self.rejected(started.elapsed())),
        }
    }

    fn acquired(&self, waited: Duration) {
        if self.sink.enabled() {
            self.sink.emit(
                &ResilienceEvent::new(Component::Bulkhead, self.name.clone(), EventKind::BulkheadAcquired)
                    .with_duration(waited),
            );
        }
    }

    fn rejected<E>(&self, waited: Duration) -> ResilienceError<E> {
        tracing::debug!(
            name = %self.name,
            max_concurrent = self.config.max_concurrent,
            waited = ?waited,
            "bulkhead full; rejecting call"
        );
        if self.sink.enabled() {
            self.sink.emit(
                &ResilienceEvent::new(Component::Bulkhead, self.name.clone(), EventKind::BulkheadRejected)
                    .with_duration(waited),
            );
        }
        ResilienceError::BulkheadFull { max_concurrent: self.config.max_concurrent }
    }

    fn cancelled<E>(&self) -> ResilienceError<E> {
        tracing::debug!(name = %self.name, "bulkhead: caller cancelled while waiting");
        if self.sink.enabled() {
            self.sink.emit(&ResilienceEvent::new(Component::Bulkhead, self.name.clone(), EventKind::Cancelled));
        }
        ResilienceError::Cancelled
    }
}
