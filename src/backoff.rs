//! Backoff strategy for retries: a subscription's configured ordered
//! sequence of base delays.

use std::time::Duration;

/// Backoff strategy for retries
#[derive(Debug, Clone)]
pub enum Backoff {
    /// An explicit, ordered list of base delays `[b0, b1, ..., b(k-1)]`.
    ///
    /// This is how a subscription's `retry-backoff-ms` is represented: attempt
    /// `n` (1-indexed) uses `b[min(n-1, k-1)]` — the sequence holds once it runs out.
    Sequence { delays: Vec<Duration> },
}

impl Backoff {
    /// Create a backoff strategy from an explicit ordered sequence of delays.
    /// An empty sequence behaves as a zero delay.
    pub fn sequence(delays: Vec<Duration>) -> Self {
        Backoff::Sequence { delays }
    }

    /// Calculate the delay for a given attempt number (1-indexed)
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Sequence { delays } => {
                if delays.is_empty() {
                    return Duration::from_millis(0);
                }
                let index = attempt.saturating_sub(1).min(delays.len() - 1);
                delays[index]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_backoff_uses_ordered_list() {
        let backoff = Backoff::sequence(vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn sequence_backoff_holds_last_element_past_its_length() {
        let backoff = Backoff::sequence(vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(backoff.delay(5), Duration::from_millis(200));
        assert_eq!(backoff.delay(100), Duration::from_millis(200));
    }

    #[test]
    fn sequence_backoff_empty_is_zero() {
        let backoff = Backoff::sequence(vec![]);
        assert_eq!(backoff.delay(1), Duration::from_millis(0));
    }
}
