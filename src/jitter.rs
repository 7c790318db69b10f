//! Additive jitter applied on top of a computed backoff delay, to avoid
//! synchronized retry storms across concurrent tasks.

use rand::Rng;
use std::time::Duration;

/// Fractional jitter in `[0, 1]`: the final delay is `delay +- delay * fraction`,
/// sampled uniformly and clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter(f64);

impl Jitter {
    pub fn new(fraction: f64) -> Self {
        Self(fraction.clamp(0.0, 1.0))
    }

    pub fn none() -> Self {
        Self(0.0)
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }

    /// Apply jitter using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rand::rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG, for deterministic tests.
    pub fn apply_with_rng<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.0 == 0.0 {
            return delay;
        }
        let millis = delay.as_millis() as f64;
        let spread = millis * self.0;
        let offset = if spread > 0.0 { rng.random_range(-spread..=spread) } else { 0.0 };
        let jittered = (millis + offset).max(0.0);
        Duration::from_millis(jittered as u64)
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::any;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zero_jitter_is_exact() {
        let jitter = Jitter::none();
        let delay = Duration::from_secs(1);
        assert_eq!(jitter.apply(delay), delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let jitter = Jitter::new(0.5);
        let delay = Duration::from_secs(1);
        let lower = Duration::from_millis(500);
        let upper = Duration::from_millis(1500);
        for _ in 0..200 {
            let jittered = jitter.apply(delay);
            assert!(jittered >= lower && jittered <= upper);
        }
    }

    #[test]
    fn jitter_never_goes_negative() {
        let jitter = Jitter::new(1.0);
        let delay = Duration::from_millis(10);
        for _ in 0..200 {
            let jittered = jitter.apply(delay);
            assert!(jittered <= Duration::from_millis(20));
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        let jitter = Jitter::new(0.5);
        assert_eq!(jitter.apply(Duration::from_millis(0)), Duration::from_millis(0));
    }

    #[test]
    fn deterministic_with_seeded_rng() {
        let jitter = Jitter::new(0.2);
        let delay = Duration::from_millis(1000);
        let mut rng = StdRng::seed_from_u64(7);
        let a = jitter.apply_with_rng(delay, &mut rng);
        let mut rng = StdRng::seed_from_u64(7);
        let b = jitter.apply_with_rng(delay, &mut rng);
        assert_eq!(a, b);
        assert!(a >= Duration::from_millis(800) && a <= Duration::from_millis(1200));
    }

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(Jitter::new(-1.0).fraction(), 0.0);
        assert_eq!(Jitter::new(5.0).fraction(), 1.0);
    }

    proptest::proptest! {
        #[test]
        fn jittered_delay_stays_within_fraction_bounds(
            fraction in 0.0f64..=1.0,
            delay_ms in 0u64..60_000,
            seed in any::<u64>(),
        ) {
            let jitter = Jitter::new(fraction);
            let delay = Duration::from_millis(delay_ms);
            let mut rng = StdRng::seed_from_u64(seed);
            let jittered = jitter.apply_with_rng(delay, &mut rng);

            let spread = (delay_ms as f64) * fraction;
            let lower = Duration::from_millis((delay_ms as f64 - spread).max(0.0) as u64);
            let upper = Duration::from_millis((delay_ms as f64 + spread) as u64);
            proptest::prop_assert!(jittered >= lower && jittered <= upper);
        }
    }
}
