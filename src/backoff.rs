//! Exponential backoff schedule for the retry executor.
//!
//! Retry index semantics: index `0` is the sleep after the first failed attempt, so the
//! schedule is `base, base * m, base * m^2, ...`, each step capped at `max`. Computation is done
//! in `f64` nanoseconds and saturates at `max` instead of overflowing.
//!
//! ```rust
//! use std::time::Duration;
//! use bulwark::Backoff;
//!
//! let backoff = Backoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(1));
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay(10), Duration::from_secs(1)); // capped
//! ```

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    /// Callers are expected to pass values already checked by
    /// [`RetryConfig`](crate::RetryConfig); out-of-range inputs still never panic.
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self { base, multiplier, max }
    }

    /// Un-jittered delay before retry `retry` (0-based), clamped to `[0, max]`.
    pub fn delay(&self, retry: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.base.as_nanos() as f64 * self.multiplier.powi(exponent);
        clamp_nanos(scaled, self.max)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Convert fractional nanoseconds to a `Duration` within `[0, max]`; NaN maps to `max`.
pub(crate) fn clamp_nanos(nanos: f64, max: Duration) -> Duration {
    if nanos.is_nan() || nanos >= max.as_nanos() as f64 {
        max
    } else if nanos <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(nanos.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_geometrically_until_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), 3.0, Duration::from_secs(2));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(300));
        assert_eq!(backoff.delay(2), Duration::from_millis(900));
        assert_eq!(backoff.delay(3), Duration::from_secs(2));
    }

    #[test]
    fn multiplier_of_one_is_constant() {
        let backoff = Backoff::new(Duration::from_millis(50), 1.0, Duration::from_secs(1));
        for retry in 0..20 {
            assert_eq!(backoff.delay(retry), Duration::from_millis(50));
        }
    }

    #[test]
    fn huge_retry_index_saturates_at_max() {
        let backoff = Backoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn zero_base_stays_zero() {
        let backoff = Backoff::new(Duration::ZERO, 2.0, Duration::from_secs(1));
        assert_eq!(backoff.delay(5), Duration::ZERO);
    }

    #[test]
    fn clamp_handles_nan_and_negative() {
        let max = Duration::from_secs(3);
        assert_eq!(clamp_nanos(f64::NAN, max), max);
        assert_eq!(clamp_nanos(-1.0, max), Duration::ZERO);
        assert_eq!(clamp_nanos(f64::INFINITY, max), max);
        assert_eq!(clamp_nanos(1_499.6, max), Duration::from_nanos(1_500));
    }
}
