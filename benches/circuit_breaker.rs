use bulwark::{
    CircuitBreaker, CircuitBreakerConfig, ResilienceError, ResilienceLayer, ResilienceStack,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use tower::{Service, ServiceBuilder, ServiceExt};

#[derive(Debug)]
struct BenchError;

impl std::fmt::Display for BenchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bench error")
    }
}

impl std::error::Error for BenchError {}

fn breaker(failure_threshold: u32) -> CircuitBreaker {
    let config = CircuitBreakerConfig::new(failure_threshold, 1, Duration::from_secs(30)).unwrap();
    CircuitBreaker::new("bench", config)
}

fn circuit_breaker_closed_success(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = breaker(10);

    c.bench_function("circuit_breaker_closed_success", |b| {
        b.to_async(&rt).iter(|| async {
            let result = breaker
                .execute(|| async { Ok::<_, ResilienceError<BenchError>>(black_box(1u64)) })
                .await;
            black_box(result)
        });
    });
}

fn circuit_breaker_open_rejection(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = breaker(1);
    rt.block_on(async {
        let _ = breaker.execute(|| async { Err::<(), _>(ResilienceError::Inner(BenchError)) }).await;
    });

    c.bench_function("circuit_breaker_open_rejection", |b| {
        b.to_async(&rt).iter(|| async {
            let result =
                breaker.execute(|| async { Ok::<_, ResilienceError<BenchError>>(()) }).await;
            black_box(result)
        });
    });
}

fn circuit_breaker_state_read(c: &mut Criterion) {
    let breaker = breaker(10);
    c.bench_function("circuit_breaker_state_read", |b| b.iter(|| black_box(breaker.state())));
}

fn circuit_breaker_tower_layer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let stack = ResilienceStack::<BenchError>::builder().circuit_breaker(breaker(10)).build();
    let svc = ServiceBuilder::new()
        .layer(ResilienceLayer::new(stack))
        .service(tower::service_fn(|req: &'static str| async move { Ok::<_, BenchError>(req) }));

    c.bench_function("circuit_breaker_tower_layer", |b| {
        b.to_async(&rt).iter(|| async {
            let mut local_svc = svc.clone();
            let ready = local_svc.ready().await.unwrap();
            let _ = black_box(ready.call(black_box("request")).await);
        });
    });
}

criterion_group!(
    benches,
    circuit_breaker_closed_success,
    circuit_breaker_open_rejection,
    circuit_breaker_state_read,
    circuit_breaker_tower_layer
);
criterion_main!(benches);
