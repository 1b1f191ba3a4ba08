use std::io;

use serde::Deserialize;

use super::{RtError, RtResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    #[default]
    Realtime,
    Monotonic,
}

impl ClockKind {
    fn id(self) -> libc::clockid_t {
        match self {
            ClockKind::Realtime => libc::CLOCK_REALTIME,
            ClockKind::Monotonic => libc::CLOCK_MONOTONIC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }
}

/// High resolution time source used to bracket the mapping computation.
pub trait Clock: Send {
    fn now(&mut self) -> RtResult<Timestamp>;
}

pub struct PosixClock {
    kind: ClockKind,
}

impl PosixClock {
    pub fn new(kind: ClockKind) -> Self {
        Self { kind }
    }
}

impl Clock for PosixClock {
    fn now(&mut self) -> RtResult<Timestamp> {
        // SAFETY: timespec is plain data; all-zero is a valid value.
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        // SAFETY: `ts` is a valid, writable timespec.
        if unsafe { libc::clock_gettime(self.kind.id(), &mut ts) } != 0 {
            return Err(RtError::ClockReadFailed {
                clock: self.kind,
                source: io::Error::last_os_error(),
            });
        }
        Ok(Timestamp::new(ts.tv_sec as i64, ts.tv_nsec as u32))
    }
}

/// Interval between two readings using the sub-second components only.
/// Pairs whose end nanoseconds do not exceed the start (a second rollover
/// between the readings) yield `None` and are not measured.
pub fn sub_second_interval(start: Timestamp, end: Timestamp) -> Option<u32> {
    (end.nanos > start.nanos).then(|| end.nanos - start.nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_within_one_second() {
        let start = Timestamp::new(10, 1_000);
        let end = Timestamp::new(10, 251_000);
        assert_eq!(sub_second_interval(start, end), Some(250_000));
    }

    #[test]
    fn rollover_pairs_are_dropped() {
        let start = Timestamp::new(10, 999_999_500);
        let end = Timestamp::new(11, 300);
        assert_eq!(sub_second_interval(start, end), None, "second rollover must not produce a sample");
        assert_eq!(sub_second_interval(start, start), None, "zero-length pairs are not monotonic");
    }

    #[test]
    fn posix_clocks_advance() {
        let mut clock = PosixClock::new(ClockKind::Monotonic);
        let first = clock.now().expect("monotonic clock readable");
        let second = clock.now().expect("monotonic clock readable");
        assert!(second >= first, "monotonic clock went backwards");
    }
}
