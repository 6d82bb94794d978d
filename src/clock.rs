use chrono::{DateTime, FixedOffset, Local};

/// Source of the current wall-clock time.
///
/// Day boundaries for streaks and the hour used for badges are taken from the
/// offset carried by the returned timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Server-local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

#[cfg(test)]
pub use fixed::{utc, FixedClock};
