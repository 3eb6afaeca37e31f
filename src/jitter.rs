//! Proportional jitter for retry delays.
//!
//! A delay `d` with fraction `f` becomes a uniform sample from `[d * (1 - f), d * (1 + f)]`.
//! Spreading retries this way keeps a fleet of callers that failed together from retrying in
//! lockstep.
//!
//! Notes:
//! - RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//!   `apply_with_rng`.
//! - The result is never negative. Capping at the configured maximum is the caller's job
//!   (see [`RetryConfig::delay_for`](crate::RetryConfig::delay_for)).

use rand::{rng, Rng};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    fraction: f64,
}

impl Jitter {
    /// `fraction` is clamped into `0.0..=1.0`; NaN means no jitter.
    pub fn proportional(fraction: f64) -> Self {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        Self { fraction }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-supplied RNG (for deterministic tests).
    pub fn apply_with_rng<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.fraction == 0.0 || delay.is_zero() {
            return delay;
        }
        let offset: f64 = rng.random_range(-self.fraction..=self.fraction);
        let nanos = delay.as_nanos() as f64 * (1.0 + offset);
        if nanos <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(nanos.min(u64::MAX as f64).round() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zero_fraction_returns_exact_delay() {
        let delay = Duration::from_millis(750);
        assert_eq!(Jitter::proportional(0.0).apply(delay), delay);
    }

    #[test]
    fn stays_within_fraction_band() {
        let jitter = Jitter::proportional(0.25);
        let delay = Duration::from_millis(1000);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..500 {
            let jittered = jitter.apply_with_rng(delay, &mut rng);
            assert!(jittered >= Duration::from_millis(750), "{jittered:?}");
            assert!(jittered <= Duration::from_millis(1250), "{jittered:?}");
        }
    }

    #[test]
    fn full_fraction_never_goes_negative() {
        let jitter = Jitter::proportional(1.0);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let jittered = jitter.apply_with_rng(Duration::from_millis(10), &mut rng);
            assert!(jittered <= Duration::from_millis(20));
        }
    }

    #[test]
    fn actually_varies() {
        let jitter = Jitter::proportional(0.5);
        let mut rng = StdRng::seed_from_u64(1234);
        let samples: Vec<_> =
            (0..20).map(|_| jitter.apply_with_rng(Duration::from_secs(1), &mut rng)).collect();
        assert!(samples.iter().any(|d| *d != samples[0]));
    }

    #[test]
    fn out_of_range_fraction_is_clamped() {
        assert_eq!(Jitter::proportional(3.0).fraction(), 1.0);
        assert_eq!(Jitter::proportional(-1.0).fraction(), 0.0);
        assert_eq!(Jitter::proportional(f64::NAN).fraction(), 0.0);
    }

    #[test]
    fn zero_delay_is_untouched() {
        assert_eq!(Jitter::proportional(0.5).apply(Duration::ZERO), Duration::ZERO);
    }
}
