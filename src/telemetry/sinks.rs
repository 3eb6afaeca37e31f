use super::events::{EventKind, ResilienceEvent};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tower::{Service, ServiceExt};

/// Consumer of executor events.
///
/// `emit` is called inline from executor hot paths, including while the circuit breaker holds
/// its state lock, so implementations must be fast and must never block or call back into the
/// executor that emitted the event.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: &ResilienceEvent);

    /// Executors skip building events entirely when this returns `false`.
    fn enabled(&self) -> bool {
        true
    }
}

/// Discards all events. Used when no sink is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ResilienceEvent) {}

    fn enabled(&self) -> bool {
        false
    }
}

/// Forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &ResilienceEvent) {
        match event.kind {
            EventKind::CircuitOpened | EventKind::RetryExhausted => {
                tracing::warn!(component = %event.component, name = %event.name, event = %event, "resilience_event")
            }
            _ => {
                tracing::info!(component = %event.component, name = %event.name, event = %event, "resilience_event")
            }
        }
    }
}

/// Keeps the most recent events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<ResilienceEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Kinds of the buffered events, in emission order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ResilienceEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ResilienceEvent) {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event.clone());
    }
}

/// Sends every event to each of the wrapped sinks.
#[derive(Clone, Debug, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &ResilienceEvent) {
        for sink in self.sinks.iter().filter(|s| s.enabled()) {
            sink.emit(event);
        }
    }

    fn enabled(&self) -> bool {
        self.sinks.iter().any(|s| s.enabled())
    }
}

/// Bridges to an asynchronous `tower::Service<ResilienceEvent>` (metrics exporters, log
/// shippers) without blocking the executor.
///
/// Events go through a bounded queue to a worker task that drives the service. When the queue
/// is full the event is dropped and counted.
#[derive(Clone, Debug)]
pub struct ServiceSink {
    tx: mpsc::Sender<ResilienceEvent>,
    dropped: Arc<AtomicU64>,
}

impl ServiceSink {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<S>(service: S, capacity: usize) -> Result<Self, tokio::runtime::TryCurrentError>
    where
        S: Service<ResilienceEvent, Response = ()> + Send + 'static,
        S::Error: fmt::Display + Send,
        S::Future: Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current()?;
        let (tx, mut rx) = mpsc::channel::<ResilienceEvent>(capacity.max(1));

        handle.spawn(async move {
            let mut service = service;
            while let Some(event) = rx.recv().await {
                let ready = match service.ready().await {
                    Ok(ready) => ready,
                    Err(e) => {
                        tracing::warn!(error = %e, "event service failed; stopping event forwarding");
                        break;
                    }
                };
                if let Err(e) = ready.call(event).await {
                    tracing::debug!(error = %e, "event service rejected event");
                }
            }
        });

        Ok(Self { tx, dropped: Arc::new(AtomicU64::new(0)) })
    }

    /// Events dropped because the queue was full or the worker had stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ServiceSink {
    fn emit(&self, event: &ResilienceEvent) {
        if self.tx.try_send(event.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Component;
    use std::convert::Infallible;

    fn event(kind: EventKind) -> ResilienceEvent {
        ResilienceEvent::new(Component::Bulkhead, "test".into(), kind)
    }

    #[test]
    fn null_sink_is_disabled() {
        assert!(!NullSink.enabled());
        NullSink.emit(&event(EventKind::BulkheadRejected));
    }

    #[test]
    fn memory_sink_evicts_oldest() {
        let sink = MemorySink::with_capacity(2);
        sink.emit(&event(EventKind::BulkheadAcquired));
        sink.emit(&event(EventKind::BulkheadRejected));
        sink.emit(&event(EventKind::Cancelled));

        assert_eq!(sink.kinds(), vec![EventKind::BulkheadRejected, EventKind::Cancelled]);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.count(EventKind::Cancelled), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn fanout_reaches_every_enabled_sink() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let fanout = FanoutSink::new().with(a.clone()).with(NullSink).with(b.clone());

        assert!(fanout.enabled());
        fanout.emit(&event(EventKind::BulkheadAcquired));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert!(!FanoutSink::new().with(NullSink).enabled());
    }

    #[test]
    fn service_sink_requires_runtime() {
        let svc = tower::service_fn(|_e: ResilienceEvent| async { Ok::<_, Infallible>(()) });
        assert!(ServiceSink::spawn(svc, 8).is_err());
    }

    #[tokio::test]
    async fn service_sink_forwards_to_service() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let svc = tower::service_fn(move |e: ResilienceEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(e);
                Ok::<_, Infallible>(())
            }
        });
        let sink = ServiceSink::spawn(svc, 8).expect("inside runtime");

        sink.emit(&event(EventKind::BulkheadRejected));
        let received = rx.recv().await.expect("event forwarded");
        assert_eq!(received.kind, EventKind::BulkheadRejected);
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn service_sink_counts_drops_when_full() {
        // The worker never gets scheduled before the burst below because this test runs on a
        // current-thread runtime and never yields.
        let svc = tower::service_fn(|_e: ResilienceEvent| async { Ok::<_, Infallible>(()) });
        let sink = ServiceSink::spawn(svc, 1).expect("inside runtime");

        for _ in 0..5 {
            sink.emit(&event(EventKind::BulkheadAcquired));
        }
        assert_eq!(sink.dropped(), 4);
    }
}
