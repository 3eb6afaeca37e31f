use bulwark::{ManualClock, RateLimitConfig, RateLimiter, ResilienceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn limiter(capacity: u32, period: Duration) -> (RateLimiter, ManualClock) {
    let clock = ManualClock::new();
    let limiter = RateLimiter::new("api", RateLimitConfig::new(capacity, period).unwrap())
        .with_clock(clock.clone());
    (limiter, clock)
}

#[test]
fn token_bucket_allows_and_refills() {
    let (bucket, clock) = limiter(10, Duration::from_secs(1));

    for _ in 0..10 {
        assert!(bucket.allow());
    }
    assert!(!bucket.allow(), "11th call in the same instant must be denied");
    assert!(bucket.time_until_available() > Duration::ZERO);

    clock.advance(Duration::from_secs(1));
    for _ in 0..10 {
        assert!(bucket.allow());
    }
    assert!(!bucket.allow());
}

#[test]
fn partial_refill_grants_whole_tokens_only() {
    let (bucket, clock) = limiter(4, Duration::from_secs(1));
    while bucket.allow() {}

    clock.advance(Duration::from_millis(490));
    assert!(bucket.allow(), "1.96 tokens accrued");
    assert!(!bucket.allow(), "0.96 tokens left");

    clock.advance(Duration::from_millis(20));
    assert!(bucket.allow());
}

#[test]
fn idle_time_never_overfills() {
    let (bucket, clock) = limiter(3, Duration::from_millis(100));
    clock.advance(Duration::from_secs(3600));
    assert_eq!(bucket.available_tokens(), 3.0);
    let granted = (0..10).filter(|_| bucket.allow()).count();
    assert_eq!(granted, 3);
}

#[test]
fn shared_between_threads() {
    let (bucket, _clock) = limiter(100, Duration::from_secs(60));
    let granted = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let bucket = bucket.clone();
            let granted = granted.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    if bucket.allow() {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(granted.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn execute_reports_configured_limit() {
    let (bucket, _clock) = limiter(1, Duration::from_millis(500));
    assert!(bucket.allow());

    let err = bucket
        .execute(|| async { Ok::<_, ResilienceError<std::io::Error>>(()) })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "rate limit exceeded (1 calls per 500ms)");
}
