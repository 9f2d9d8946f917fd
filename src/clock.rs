//! Time source and cancellable sleeping.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cancel::CancellationToken;

/// Trait for time sources (system clock, virtual clock in tests).
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration` unless `cancel` fires first.
    ///
    /// Returns `false` if the sleep was cut short by cancellation.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if duration.is_zero() {
            return !cancel.is_cancelled();
        }
        !cancel.wait_timeout(duration)
    }
}
