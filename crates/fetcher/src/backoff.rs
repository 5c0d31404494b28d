use std::time::Duration;

use rand::Rng;

/// Decorrelated jitter backoff.
///
/// `sleep = min(cap, uniform(base, 3 × previous_sleep))`, starting from
/// `base`. Randomizing against the previous sleep rather than the attempt
/// number keeps a fleet of retrying clients from synchronizing while still
/// honoring an exponential cap.
#[derive(Debug)]
pub struct DecorrelatedJitter {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl DecorrelatedJitter {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    /// Next sleep duration; advances the internal state.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base.as_secs_f64();
        let upper = (self.current.as_secs_f64() * 3.0).max(base);
        let drawn = rand::thread_rng().gen_range(base..=upper);
        self.current = Duration::from_secs_f64(drawn.min(self.cap.as_secs_f64()));
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleeps_stay_within_envelope() {
        // s₁ ∈ [base, cap], sₙ ∈ [base, min(cap, 3·sₙ₋₁)].
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(8);

        for _ in 0..200 {
            let mut backoff = DecorrelatedJitter::new(base, cap);
            let mut previous = base;
            for _ in 0..5 {
                let sleep = backoff.next_delay();
                assert!(sleep >= base, "sleep {:?} below base", sleep);
                assert!(sleep <= cap, "sleep {:?} above cap", sleep);
                let upper = Duration::from_secs_f64((previous.as_secs_f64() * 3.0).min(cap.as_secs_f64()));
                assert!(sleep <= upper, "sleep {:?} above 3×previous {:?}", sleep, upper);
                previous = sleep;
            }
        }
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = DecorrelatedJitter::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..10 {
            backoff.next_delay();
        }
        backoff.reset();
        let sleep = backoff.next_delay();
        // After a reset the next draw is bounded by 3 × base again.
        assert!(sleep <= Duration::from_secs(3));
    }
}
