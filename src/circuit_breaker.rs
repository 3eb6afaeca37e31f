//! Three-state circuit breaker.
//!
//! # States
//! - **Closed**: calls pass through. Consecutive failures are counted; reaching
//!   `failure_threshold` opens the circuit. Any success resets the count.
//! - **Open**: calls are rejected with [`ResilienceError::CircuitOpen`] without running the
//!   operation, until `open_timeout` has elapsed since the circuit opened.
//! - **HalfOpen**: calls pass through as recovery probes (optionally capped by
//!   `half_open_max_calls`). A single failure reopens the circuit; `success_threshold`
//!   consecutive successes close it.
//!
//! ```text
//! Closed ──failures >= threshold──▶ Open ──open_timeout elapsed──▶ HalfOpen
//!   ▲                                ▲                                │
//!   └──────successes >= threshold────┼────────────────────────────────┤
//!                                    └───────────any failure──────────┘
//! ```
//!
//! # Consistency
//! The state and both counters live behind one mutex, and every transition happens while it is
//! held. An atomic copy of the state lets `state()` and the admission check skip the lock on
//! the common path; the Open → HalfOpen transition is double-checked (atomic read, lock,
//! re-check) so exactly one caller performs it when many notice the timeout at once.
//!
//! `state()` is a side-effecting read: it performs the lazy Open → HalfOpen transition when the
//! open timeout has elapsed. It never touches the counters otherwise.
//!
//! Every transition bumps a generation number stored next to the state. A call only counts
//! toward the generation it was admitted in, so a call admitted while Closed that finishes after
//! the circuit opened (or went half-open) is ignored rather than taken as a probe result.
//! [`ResilienceError::Cancelled`] outcomes are not counted either way.

use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{Component, EventKind, EventSink, NullSink, ResilienceEvent};
use crate::{ConfigError, ResilienceError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

// Packed layout of `Shared::epoch`: state in the low byte, generation above it.
const STATE_BITS: u32 = 8;

fn pack(state: CircuitState, generation: u64) -> u64 {
    (generation << STATE_BITS) | u64::from(state.to_u8())
}

fn unpack(epoch: u64) -> (CircuitState, u64) {
    (CircuitState::from_u8((epoch & 0xff) as u8), epoch >> STATE_BITS)
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the open timeout elapses.
    Open,
    /// Probe mode testing whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    fn to_u8(self) -> u8 {
        match self {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::Open => STATE_OPEN,
            CircuitState::HalfOpen => STATE_HALF_OPEN,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    half_open_max_calls: Option<usize>,
}

impl CircuitBreakerConfig {
    /// Errors if either threshold is zero or `open_timeout` is zero.
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        open_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(failure_threshold));
        }
        if success_threshold == 0 {
            return Err(ConfigError::InvalidSuccessThreshold(success_threshold));
        }
        if open_timeout.is_zero() {
            return Err(ConfigError::ZeroOpenTimeout);
        }
        Ok(Self { failure_threshold, success_threshold, open_timeout, half_open_max_calls: None })
    }

    /// Cap the number of probes allowed in flight while half-open; must be > 0.
    pub fn with_half_open_limit(mut self, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidHalfOpenLimit(limit));
        }
        self.half_open_max_calls = Some(limit);
        Ok(self)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }

    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    /// `None` means probes are not capped.
    pub fn half_open_max_calls(&self) -> Option<usize> {
        self.half_open_max_calls
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: None,
        }
    }
}

/// Point-in-time view of the breaker's internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Clock reading when the circuit last opened; `None` unless Open.
    pub opened_at: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Duration>,
    generation: u64,
}

#[derive(Debug)]
struct Shared {
    counters: Mutex<Counters>,
    // Mirrors of the locked state for the lock-free fast path; only written with `counters` held.
    epoch: AtomicU64,
    opened_at_nanos: AtomicU64,
    half_open_calls: AtomicUsize,
}

/// Circuit breaker guarding one named dependency.
///
/// Clones share the same underlying state via `Arc`, so all handles observe and affect the same
/// circuit lifecycle.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

/// Releases a half-open probe slot, including when the probe panics or is dropped.
struct ProbeSlot<'a> {
    calls: &'a AtomicUsize,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        self.calls.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CircuitBreaker {
    /// # Examples
    /// ```
    /// use bulwark::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    /// use std::time::Duration;
    ///
    /// let config = CircuitBreakerConfig::new(5, 2, Duration::from_secs(30)).unwrap();
    /// let breaker = CircuitBreaker::new("inventory-db", config);
    /// assert_eq!(breaker.state(), CircuitState::Closed);
    /// ```
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            shared: Arc::new(Shared {
                counters: Mutex::new(Counters::default()),
                epoch: AtomicU64::new(pack(CircuitState::Closed, 0)),
                opened_at_nanos: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
            }),
            clock: Arc::new(MonotonicClock::default()),
            sink: Arc::new(NullSink),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving Open → HalfOpen first if the open timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        self.current().0
    }

    /// State and generation, read together.
    fn current(&self) -> (CircuitState, u64) {
        let observed = unpack(self.shared.epoch.load(Ordering::Acquire));
        if observed.0 != CircuitState::Open || !self.open_timeout_elapsed_fast() {
            return observed;
        }

        let mut counters = self.lock();
        // Re-check under the lock: another caller may already have moved us on.
        let current = self.locked_epoch();
        if current.0 == CircuitState::Open && self.open_timeout_elapsed(&counters) {
            self.transition(&mut counters, CircuitState::HalfOpen);
            return (CircuitState::HalfOpen, counters.generation);
        }
        current
    }

    /// Raw snapshot of state and counters. Unlike [`state`](Self::state) this never transitions.
    pub fn metrics(&self) -> CircuitMetrics {
        let counters = self.lock();
        CircuitMetrics {
            state: self.locked_state(),
            consecutive_failures: counters.consecutive_failures,
            consecutive_successes: counters.consecutive_successes,
            opened_at: counters.opened_at,
        }
    }

    /// Run `operation` under circuit breaker protection.
    ///
    /// # Errors
    /// Returns `ResilienceError::CircuitOpen` without calling `operation` if the circuit is open
    /// or the half-open probe limit is reached. Otherwise returns the operation's own result.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let (generation, slot) = self.admit::<E>()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.on_success(generation),
            Err(ResilienceError::Cancelled) => {}
            Err(_) => self.on_failure(generation),
        }

        drop(slot);
        result
    }

    fn admit<E>(&self) -> Result<(u64, Option<ProbeSlot<'_>>), ResilienceError<E>> {
        let (state, generation) = self.current();
        let slot = self.probe_slot(state)?;
        Ok((generation, slot))
    }

    fn probe_slot<E>(&self, state: CircuitState) -> Result<Option<ProbeSlot<'_>>, ResilienceError<E>> {
        match state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => Err(self.reject("open")),
            CircuitState::HalfOpen => {
                let Some(limit) = self.config.half_open_max_calls else {
                    return Ok(None);
                };
                let in_flight = self.shared.half_open_calls.fetch_add(1, Ordering::AcqRel);
                let slot = ProbeSlot { calls: &self.shared.half_open_calls };
                if in_flight >= limit {
                    drop(slot);
                    return Err(self.reject("half-open probes saturated"));
                }
                tracing::debug!(name = %self.name, in_flight = in_flight + 1, max = limit, "circuit breaker: half-open probe");
                Ok(Some(slot))
            }
        }
    }

    fn reject<E>(&self, reason: &'static str) -> ResilienceError<E> {
        tracing::debug!(name = %self.name, reason, "circuit breaker rejected call");
        if self.sink.enabled() {
            self.sink.emit(&ResilienceEvent::new(
                Component::CircuitBreaker,
                self.name.clone(),
                EventKind::CircuitRejected,
            ));
        }
        ResilienceError::CircuitOpen { name: self.name.clone() }
    }

    fn on_success(&self, generation: u64) {
        let mut counters = self.lock();
        if self.is_stale(&counters, generation) {
            return;
        }
        match self.locked_state() {
            CircuitState::Closed => counters.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                counters.consecutive_successes = counters.consecutive_successes.saturating_add(1);
                if counters.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut counters, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64) {
        let mut counters = self.lock();
        if self.is_stale(&counters, generation) {
            return;
        }
        match self.locked_state() {
            CircuitState::Closed => {
                counters.consecutive_failures = counters.consecutive_failures.saturating_add(1);
                if counters.consecutive_failures >= self.config.failure_threshold {
                    tracing::error!(
                        name = %self.name,
                        failures = counters.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker → open"
                    );
                    self.transition(&mut counters, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(name = %self.name, "circuit breaker: probe failed → open");
                self.transition(&mut counters, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn is_stale(&self, counters: &Counters, generation: u64) -> bool {
        let stale = counters.generation != generation;
        if stale {
            tracing::trace!(name = %self.name, admitted = generation, current = counters.generation, "circuit breaker: ignoring stale outcome");
        }
        stale
    }

    /// Apply a transition. Caller must hold the counters lock.
    fn transition(&self, counters: &mut Counters, to: CircuitState) {
        counters.consecutive_failures = 0;
        counters.consecutive_successes = 0;
        counters.generation = counters.generation.wrapping_add(1) & (u64::MAX >> STATE_BITS);

        let kind = match to {
            CircuitState::Open => {
                let now = self.clock.now();
                counters.opened_at = Some(now);
                self.shared
                    .opened_at_nanos
                    .store(u64::try_from(now.as_nanos()).unwrap_or(u64::MAX), Ordering::Release);
                EventKind::CircuitOpened
            }
            CircuitState::HalfOpen => {
                counters.opened_at = None;
                tracing::info!(name = %self.name, "circuit breaker → half-open");
                EventKind::CircuitHalfOpen
            }
            CircuitState::Closed => {
                counters.opened_at = None;
                tracing::info!(name = %self.name, "circuit breaker → closed");
                EventKind::CircuitClosed
            }
        };
        self.shared.epoch.store(pack(to, counters.generation), Ordering::Release);

        if self.sink.enabled() {
            self.sink.emit(&ResilienceEvent::new(Component::CircuitBreaker, self.name.clone(), kind));
        }
    }

    fn open_timeout_elapsed_fast(&self) -> bool {
        let opened_at = Duration::from_nanos(self.shared.opened_at_nanos.load(Ordering::Acquire));
        self.clock.now().saturating_sub(opened_at) >= self.config.open_timeout
    }

    fn open_timeout_elapsed(&self, counters: &Counters) -> bool {
        counters
            .opened_at
            .is_some_and(|at| self.clock.now().saturating_sub(at) >= self.config.open_timeout)
    }

    /// Authoritative while the counters lock is held, since every store happens under it.
    fn locked_epoch(&self) -> (CircuitState, u64) {
        unpack(self.shared.epoch.load(Ordering::Acquire))
    }

    fn locked_state(&self) -> CircuitState {
        self.locked_epoch().0
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.shared.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
