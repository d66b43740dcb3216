//! Clock abstraction used by the retry scheduler, the consumer loop's reclaim
//! math, and the emulated hot store's idle-time bookkeeping.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Wall-clock abstraction for values that leave the process: message ids
/// (`<ms-timestamp>-<seq>`), `publishedAt`/`failedAt` timestamps, and the
/// retry scheduler's `nowMs + delay` scoring.
pub trait WallClock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_epoch_millis(&self) -> u64;

    /// RFC 3339 timestamp for the current instant.
    fn now_iso(&self) -> String {
        let millis = self.now_epoch_millis() as i64;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap_or_else(Utc::now)
            .to_rfc3339()
    }
}

/// Production wall clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_epoch_millis(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Test wall clock that starts at a fixed instant and only advances when told to.
/// Lets reclaim/retry-drain tests assert exact delay bounds without real sleeps.
#[derive(Debug)]
pub struct FrozenWallClock {
    millis: AtomicI64,
}

impl FrozenWallClock {
    pub fn at(epoch_millis: i64) -> Self {
        Self { millis: AtomicI64::new(epoch_millis) }
    }

    pub fn advance(&self, delta_millis: i64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }
}

impl WallClock for FrozenWallClock {
    fn now_epoch_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_advances_deterministically() {
        let clock = FrozenWallClock::at(1_700_000_000_000);
        assert_eq!(clock.now_epoch_millis(), 1_700_000_000_000);
        clock.advance(500);
        assert_eq!(clock.now_epoch_millis(), 1_700_000_000_500);
    }
}
