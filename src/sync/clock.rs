use std::time::{Duration, Instant};

use parking_lot::Mutex;
use time::OffsetDateTime;

/// Time source for debounce deadlines and note timestamps.
pub trait Clock: Send + Sync {
    /// Monotonic time, used only for deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock time in milliseconds since the Unix epoch, stamped on notes.
    fn epoch_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_millis(&self) -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    epoch_origin: i64,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(epoch_origin: i64) -> Self {
        Self {
            origin: Instant::now(),
            epoch_origin,
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn epoch_millis(&self) -> i64 {
        self.epoch_origin + self.elapsed().as_millis() as i64
    }
}

/// Converts note timestamps back into a date for display.
pub fn datetime_from_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
