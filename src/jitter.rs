//! Jitter to prevent thundering herd on retry redelivery.

use rand::Rng;
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone)]
pub enum Jitter {
    /// Bounded jitter: random additive amount between 0 and `delay * max_fraction`,
    /// added on top of the delay (never subtracted). This is what the retry
    /// scheduler uses for its "up to 20% random jitter" rule (`max_fraction = 0.2`).
    Bounded { max_fraction: f64 },
}

impl Jitter {
    /// Create a bounded additive jitter strategy (e.g. `bounded(0.2)` for up to +20%).
    pub fn bounded(max_fraction: f64) -> Self {
        Jitter::Bounded { max_fraction: max_fraction.max(0.0) }
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::Bounded { max_fraction } => {
                let millis = delay.as_millis() as u64;
                let extra_max = (millis as f64 * max_fraction).round() as u64;
                if extra_max == 0 {
                    return delay;
                }
                let extra = rand::thread_rng().gen_range(0..=extra_max);
                delay + Duration::from_millis(extra)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_jitter_never_reduces_the_delay() {
        let jitter = Jitter::bounded(0.2);
        let delay = Duration::from_millis(100);

        for _ in 0..200 {
            let jittered = jitter.apply(delay);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(120));
        }
    }

    #[test]
    fn bounded_jitter_zero_fraction_is_exact() {
        let jitter = Jitter::bounded(0.0);
        let delay = Duration::from_millis(250);
        assert_eq!(jitter.apply(delay), delay);
    }
}
