//! # Epoch Clock
//!
//! Maps wall-clock time to the epoch index that scopes every nullifier:
//!
//! ```text
//! epoch = floor(now / epoch_duration)
//! ```
//!
//! The clock never caches. Every call re-samples the underlying [`Clock`],
//! because an epoch can roll over between two lines of the same operation.
//! Callers that need one consistent reading for a whole operation take it
//! once and pass the resulting [`Epoch`] along.
//!
//! Time is handled at millisecond resolution, matching the granularity of
//! the reference deployment's clock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::types::Epoch;

// ---------------------------------------------------------------------------
// Pure functions
// ---------------------------------------------------------------------------

fn duration_millis(epoch_duration: Duration) -> u128 {
    // Config validation rejects zero durations; clamp anyway so the
    // function stays total.
    epoch_duration.as_millis().max(1)
}

/// Epoch index containing `now` (time since the UNIX epoch).
pub fn current_epoch(now: Duration, epoch_duration: Duration) -> Epoch {
    Epoch((now.as_millis() / duration_millis(epoch_duration)) as u64)
}

/// Time until the epoch containing `now` ends. Never zero: at an exact
/// boundary a full epoch remains. A UI / backoff hint only.
pub fn time_remaining_in_epoch(now: Duration, epoch_duration: Duration) -> Duration {
    let len = duration_millis(epoch_duration);
    let elapsed = now.as_millis() % len;
    Duration::from_millis((len - elapsed) as u64)
}

// ---------------------------------------------------------------------------
// Clock sources
// ---------------------------------------------------------------------------

/// Source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the UNIX epoch.
    fn now(&self) -> Duration;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // Before 1970 is not a time this system operates in.
        let millis = chrono::Utc::now().timestamp_millis().max(0);
        Duration::from_millis(millis as u64)
    }
}

/// Manually driven clock for tests and simulations. Clones share the same
/// underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start.as_millis() as u64)),
        }
    }

    pub fn set(&self, now: Duration) {
        self.millis.store(now.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// EpochClock
// ---------------------------------------------------------------------------

/// A clock bound to a fixed epoch duration.
#[derive(Debug, Clone)]
pub struct EpochClock {
    duration: Duration,
    clock: Arc<dyn Clock>,
}

impl EpochClock {
    pub fn new(duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { duration, clock }
    }

    /// Epoch clock over the system clock.
    pub fn system(duration: Duration) -> Self {
        Self::new(duration, Arc::new(SystemClock))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Fresh reading of the current epoch.
    pub fn current_epoch(&self) -> Epoch {
        current_epoch(self.clock.now(), self.duration)
    }

    /// Fresh reading of the time left in the current epoch.
    pub fn time_remaining(&self) -> Duration {
        time_remaining_in_epoch(self.clock.now(), self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn epoch_is_floor_of_now_over_duration() {
        assert_eq!(current_epoch(Duration::ZERO, MINUTE), Epoch(0));
        assert_eq!(current_epoch(Duration::from_secs(59), MINUTE), Epoch(0));
        assert_eq!(current_epoch(Duration::from_secs(60), MINUTE), Epoch(1));
        assert_eq!(current_epoch(Duration::from_secs(3_599), MINUTE), Epoch(59));
    }

    #[test]
    fn remaining_time_counts_down_to_boundary() {
        assert_eq!(time_remaining_in_epoch(Duration::from_secs(0), MINUTE), MINUTE);
        assert_eq!(
            time_remaining_in_epoch(Duration::from_secs(45), MINUTE),
            Duration::from_secs(15)
        );
        assert_eq!(
            time_remaining_in_epoch(Duration::from_millis(119_999), MINUTE),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn boundary_belongs_to_the_new_epoch() {
        let start = MINUTE * 42;
        assert_eq!(current_epoch(start, MINUTE), Epoch(42));
        assert_eq!(current_epoch(start - Duration::from_millis(1), MINUTE), Epoch(41));
    }

    #[test]
    fn zero_duration_does_not_panic() {
        assert_eq!(current_epoch(Duration::from_millis(5), Duration::ZERO), Epoch(5));
    }

    #[test]
    fn epoch_clock_resamples_every_call() {
        let manual = ManualClock::new(Duration::from_secs(30));
        let clock = EpochClock::new(MINUTE, Arc::new(manual.clone()));
        assert_eq!(clock.current_epoch(), Epoch(0));
        assert_eq!(clock.time_remaining(), Duration::from_secs(30));

        manual.advance(Duration::from_secs(31));
        assert_eq!(clock.current_epoch(), Epoch(1));
        assert_eq!(clock.time_remaining(), Duration::from_secs(59));
    }

    #[test]
    fn epochs_never_decrease_with_system_time() {
        let clock = EpochClock::system(Duration::from_millis(1));
        let a = clock.current_epoch();
        let b = clock.current_epoch();
        assert!(b >= a);
    }
}
