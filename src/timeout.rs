//! Deadline enforcement for a single call.
//!
//! The operation's future is raced against a timer. If the timer wins the future is dropped,
//! which is the only way to stop work in Rust: anything the operation spawned keeps running
//! unless it watches a cancellation token. [`TimeoutExecutor::execute_with_token`] hands the
//! operation a child token that is cancelled when the deadline passes.

use crate::telemetry::{Component, EventKind, EventSink, NullSink, ResilienceEvent};
use crate::{ConfigError, ResilienceError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    duration: Duration,
}

impl TimeoutConfig {
    /// Errors if `duration` is zero.
    pub fn new(duration: Duration) -> Result<Self, ConfigError> {
        if duration.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self { duration })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutExecutor {
    name: Arc<str>,
    config: TimeoutConfig,
    sink: Arc<dyn EventSink>,
}

impl TimeoutExecutor {
    pub fn new(name: impl Into<Arc<str>>, config: TimeoutConfig) -> Self {
        Self { name: name.into(), config, sink: Arc::new(NullSink) }
    }

    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.config.duration
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        self.race(None, operation()).await
    }

    /// Returns `Cancelled` if `token` fires before either the operation or the deadline.
    pub async fn execute_with_cancel<T, E, Fut, Op>(
        &self,
        token: &CancellationToken,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        self.race(Some(token), operation()).await
    }

    /// Pass the operation a child of `parent`. The child is cancelled when the deadline passes
    /// (and, being a child, whenever `parent` is).
    pub async fn execute_with_token<T, E, Fut, Op>(
        &self,
        parent: &CancellationToken,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        let child = parent.child_token();
        let result = self.race(Some(parent), operation(child.clone())).await;
        if matches!(result, Err(ResilienceError::Timeout { .. })) {
            child.cancel();
        }
        result
    }

    async fn race<T, E, Fut>(
        &self,
        token: Option<&CancellationToken>,
        future: Fut,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let timed = tokio::time::timeout(self.config.duration, future);
        let outcome = match token {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(self.cancelled()),
                    outcome = timed => outcome,
                }
            }
            None => timed.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(name = %self.name, timeout = ?self.config.duration, "operation timed out");
                if self.sink.enabled() {
                    self.sink.emit(
                        &ResilienceEvent::new(Component::Timeout, self.name.clone(), EventKind::TimeoutElapsed)
                            .with_duration(self.config.duration),
                    );
                }
                Err(ResilienceError::Timeout { duration: self.config.duration })
            }
        }
    }

    fn cancelled<E>(&self) -> ResilienceError<E> {
        tracing::debug!(name = %self.name, "timeout: caller cancelled");
        if self.sink.enabled() {
            self.sink.emit(&ResilienceEvent::new(Component::Timeout, self.name.clone(), EventKind::Cancelled));
        }
        ResilienceError::Cancelled
    }
}
