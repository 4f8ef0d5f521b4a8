//! Monotonic timestamps and the view cadence types built on top of them.

use core::time::Duration;

/// A point in time, expressed as nanoseconds since an implementation-defined epoch.
///
/// `TimeStamp` is totally ordered and monotonic: every timestamp handed to a
/// [`crate::search_list::SearchList`] must be `>=` the previous one appended by the same writer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(u64);

impl TimeStamp {
    /// Construct a `TimeStamp` from a raw nanosecond count.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// The nanosecond count since the epoch.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// `self + step`, saturating at `u64::MAX`.
    pub fn saturating_add(self, step: TimeStep) -> Self {
        Self(self.0.saturating_add(step.0))
    }

    /// The duration between two timestamps, or `None` if `earlier` is after `self`.
    pub fn checked_duration_since(self, earlier: Self) -> Option<TimeStep> {
        self.0.checked_sub(earlier.0).map(TimeStep)
    }
}

impl From<Duration> for TimeStamp {
    fn from(d: Duration) -> Self {
        Self(d.as_nanos() as u64)
    }
}

/// A duration between two [`TimeStamp`]s, in nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStep(u64);

impl TimeStep {
    /// A step of zero nanoseconds — "every sample", when used as a [`TimeSeries::micro_step`].
    pub const ZERO: Self = Self(0);

    /// Construct a `TimeStep` from a raw nanosecond count.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// The nanosecond count.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }
}

impl From<Duration> for TimeStep {
    fn from(d: Duration) -> Self {
        Self(d.as_nanos() as u64)
    }
}

/// Describes the cadence at which a [`crate::views::DataView`] should yield samples.
///
/// `micro_step = TimeStep::ZERO` means "every sample starting at `start_time`".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimeSeries {
    /// The first timestamp a view should consider.
    pub start_time: TimeStamp,
    /// The minimum gap, in nanoseconds, between two yielded samples.
    pub micro_step: TimeStep,
}

impl TimeSeries {
    /// A series that yields every sample from `start_time` onward.
    pub fn every_sample(start_time: TimeStamp) -> Self {
        Self {
            start_time,
            micro_step: TimeStep::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_monotonic() {
        let a = TimeStamp::from_nanos(10);
        let b = TimeStamp::from_nanos(20);

        assert!(a < b);
        assert_eq!(b.checked_duration_since(a), Some(TimeStep::from_nanos(10)));
        assert_eq!(a.checked_duration_since(b), None);
    }

    #[test]
    fn saturating_add_does_not_overflow() {
        let t = TimeStamp::from_nanos(u64::MAX - 1);

        assert_eq!(t.saturating_add(TimeStep::from_nanos(10)).as_nanos(), u64::MAX);
    }
}
