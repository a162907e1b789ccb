//! Randomizes retry delays so replicas hammering the same store spread out.

use rand::{rng, Rng};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the backoff delay as-is.
    None,
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-provided RNG (deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_is_identity() {
        assert_eq!(Jitter::None.apply(Duration::from_millis(123)), Duration::from_millis(123));
    }

    #[test]
    fn full_and_equal_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let delay = Duration::from_millis(400);
        for _ in 0..200 {
            assert!(Jitter::Full.apply_with_rng(delay, &mut rng) <= delay);
            let equal = Jitter::Equal.apply_with_rng(delay, &mut rng);
            assert!(equal >= Duration::from_millis(200) && equal <= delay);
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
