use bulwark::{
    BulkheadConfig, BulkheadExecutor, CircuitBreaker, CircuitBreakerConfig, Component, EventKind,
    FanoutSink, InstantSleeper, LogSink, ManualClock, MemorySink, ResilienceError, ResilienceEvent,
    RetryConfig, RetryExecutor, ServiceSink,
};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

#[derive(Debug)]
struct Boom;

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom")
    }
}

impl std::error::Error for Boom {}

#[tokio::test]
async fn breaker_lifecycle_is_observable() {
    init_tracing();
    let clock = ManualClock::new();
    let memory = MemorySink::new();
    let breaker =
        CircuitBreaker::new("orders-db", CircuitBreakerConfig::new(2, 1, Duration::from_secs(10)).unwrap())
            .with_clock(clock.clone())
            .with_sink(FanoutSink::new().with(memory.clone()).with(LogSink));

    for _ in 0..2 {
        let _ = breaker.execute(|| async { Err::<(), _>(ResilienceError::Inner(Boom)) }).await;
    }
    let _ = breaker.execute(|| async { Ok::<_, ResilienceError<Boom>>(()) }).await;
    clock.advance(Duration::from_secs(10));
    let _ = breaker.execute(|| async { Ok::<_, ResilienceError<Boom>>(()) }).await;

    assert_eq!(
        memory.kinds(),
        vec![
            EventKind::CircuitOpened,
            EventKind::CircuitRejected,
            EventKind::CircuitHalfOpen,
            EventKind::CircuitClosed,
        ]
    );
    assert!(memory.events().iter().all(|e| e.component == Component::CircuitBreaker));
    assert!(memory.events().iter().all(|e| &*e.name == "orders-db"));
}

#[tokio::test]
async fn retry_events_reach_a_tower_service() {
    init_tracing();
    let (tx, mut rx) = mpsc::unbounded_channel::<ResilienceEvent>();
    let exporter = tower::service_fn(move |event: ResilienceEvent| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
            Ok::<_, Infallible>(())
        }
    });
    let sink = ServiceSink::spawn(exporter, 64).expect("inside runtime");

    let config = RetryConfig::builder()
        .max_attempts(2)
        .base_delay(Duration::from_millis(5))
        .jitter_fraction(0.0)
        .build()
        .unwrap();
    let retry = RetryExecutor::new("checkout", config).with_sleeper(InstantSleeper).with_sink(sink.clone());

    let result = retry.execute(|| async { Err::<(), _>(ResilienceError::Inner(Boom)) }).await;
    assert!(result.unwrap_err().is_retry_exhausted());

    let attempt = rx.recv().await.expect("attempt event");
    assert_eq!(attempt.kind, EventKind::RetryAttempt);
    assert_eq!(attempt.duration, Some(Duration::from_millis(5)));
    assert_eq!(attempt.cause.as_deref(), Some("boom"));

    let exhausted = rx.recv().await.expect("exhausted event");
    assert_eq!(exhausted.kind, EventKind::RetryExhausted);
    assert_eq!(exhausted.attempt, Some(2));
    assert_eq!(sink.dropped(), 0);
}

#[tokio::test]
async fn bulkhead_rejection_carries_wait_time() {
    let memory = MemorySink::new();
    let bulkhead = BulkheadExecutor::new("pool", BulkheadConfig::new(1, Duration::ZERO).unwrap())
        .with_sink(memory.clone());

    let result = bulkhead
        .execute(|| async {
            bulkhead.execute(|| async { Ok::<_, ResilienceError<Boom>>(()) }).await
        })
        .await;

    assert!(result.unwrap_err().is_bulkhead_full());
    assert_eq!(memory.kinds(), vec![EventKind::BulkheadAcquired, EventKind::BulkheadRejected]);
    assert_eq!(memory.events()[1].duration, Some(Duration::ZERO));
    assert_eq!(memory.events()[1].to_string(), "bulkhead[pool]::bulkhead_rejected duration=0ns");
}
