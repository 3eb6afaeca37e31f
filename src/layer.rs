//! Tower integration: run every request through a [`ResilienceStack`].
//!
//! ```rust
//! use bulwark::{ResilienceError, ResilienceLayer, ResilienceStack, TimeoutConfig, TimeoutExecutor};
//! use std::time::Duration;
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let stack = ResilienceStack::<std::io::Error>::builder()
//!     .timeout(TimeoutExecutor::new("echo", TimeoutConfig::new(Duration::from_secs(1)).unwrap()))
//!     .build();
//! let svc = ServiceBuilder::new()
//!     .layer(ResilienceLayer::new(stack))
//!     .service(service_fn(|req: u32| async move { Ok::<_, std::io::Error>(req * 2) }));
//!
//! let resp: Result<u32, ResilienceError<std::io::Error>> = svc.oneshot(21).await;
//! assert_eq!(resp.unwrap(), 42);
//! # });
//! ```

use crate::{ResilienceError, ResilienceStack};
use futures::future::BoxFuture;
use std::fmt;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service, ServiceExt};

/// Wraps services in a [`ResilienceService`].
pub struct ResilienceLayer<E> {
    stack: ResilienceStack<E>,
    token: Option<CancellationToken>,
}

impl<E> ResilienceLayer<E> {
    pub fn new(stack: ResilienceStack<E>) -> Self {
        Self { stack, token: None }
    }

    /// Run every request with [`ResilienceStack::execute_with_cancel`]; once `token` fires,
    /// pending and future calls resolve to `Cancelled`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

impl<E> Clone for ResilienceLayer<E> {
    fn clone(&self) -> Self {
        Self { stack: self.stack.clone(), token: self.token.clone() }
    }
}

impl<E> fmt::Debug for ResilienceLayer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceLayer")
            .field("stack", &self.stack)
            .field("token", &self.token)
            .finish()
    }
}

impl<S, E> Layer<S> for ResilienceLayer<E> {
    type Service = ResilienceService<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        ResilienceService { inner, stack: self.stack.clone(), token: self.token.clone() }
    }
}

/// Service produced by [`ResilienceLayer`].
///
/// Each attempt calls a fresh clone of the inner service with a clone of the request, and the
/// inner service's errors surface as [`ResilienceError::Inner`].
pub struct ResilienceService<S, E> {
    inner: S,
    stack: ResilienceStack<E>,
    token: Option<CancellationToken>,
}

impl<S: Clone, E> Clone for ResilienceService<S, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), stack: self.stack.clone(), token: self.token.clone() }
    }
}

impl<S: fmt::Debug, E> fmt::Debug for ResilienceService<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceService")
            .field("inner", &self.inner)
            .field("stack", &self.stack)
            .field("token", &self.token)
            .finish()
    }
}

impl<S, E, Request> Service<Request> for ResilienceService<S, E>
where
    Request: Clone + Send + Sync + 'static,
    S: Service<Request> + Clone + Send + Sync + 'static,
    S::Response: Send + 'static,
    S::Error: Into<E>,
    S::Future: Send + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(|e| ResilienceError::Inner(e.into()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Keep the instance that was driven to readiness for this call.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let stack = self.stack.clone();
        let token = self.token.clone();

        Box::pin(async move {
            let operation = || {
                let svc = inner.clone();
                let req = req.clone();
                async move { svc.oneshot(req).await.map_err(|e| ResilienceError::Inner(e.into())) }
            };
            match &token {
                Some(token) => stack.execute_with_cancel(token, operation).await,
                None => stack.execute(operation).await,
            }
        })
    }
}
