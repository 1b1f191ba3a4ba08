//! Scheduling and isolation control for the timing-critical context, plus the
//! clocks used to measure it.
pub mod clock;
pub mod error;
pub mod linux;

use log::{info, warn};

pub use clock::{Clock, ClockKind, PosixClock, Timestamp, sub_second_interval};
pub use error::{RtError, RtResult};
pub use linux::{ContextId, LinuxRt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Highest priority the FIFO class supports.
    Max,
    Level(i32),
}

/// The three independent knobs behind bounded latency. `elevate` and
/// `lock_memory` act on the caller; `pin_to_processor` on the given context.
pub trait RtController: Send + Sync {
    fn elevate(&self, priority: Priority) -> RtResult<()>;
    fn lock_memory(&self) -> RtResult<()>;
    fn pin_to_processor(&self, context: ContextId, processor: usize) -> RtResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Skipped,
    Applied,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolationOutcome {
    pub pinned: Step,
    pub elevated: Step,
    pub locked: Step,
}

impl IsolationOutcome {
    /// Latency is only bounded when every step was requested and took effect.
    pub fn bounded_latency(&self) -> bool {
        [self.pinned, self.elevated, self.locked]
            .iter()
            .all(|step| *step == Step::Applied)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsolationPolicy {
    pub priority: Option<Priority>,
    pub lock_memory: bool,
    pub processor: Option<usize>,
}

impl IsolationPolicy {
    /// Pin, elevate, then lock memory. Rejections are logged and the context
    /// carries on with best-effort timing.
    pub fn apply(&self, controller: &dyn RtController, context: ContextId) -> IsolationOutcome {
        let pinned = match self.processor {
            None => Step::Skipped,
            Some(cpu) => record(controller.pin_to_processor(context, cpu)),
        };
        let elevated = match self.priority {
            None => Step::Skipped,
            Some(priority) => record(controller.elevate(priority)),
        };
        let locked = if self.lock_memory {
            record(controller.lock_memory())
        } else {
            Step::Skipped
        };
        let outcome = IsolationOutcome {
            pinned,
            elevated,
            locked,
        };
        if outcome.bounded_latency() {
            info!("{context} isolated: pinned, SCHED_FIFO, memory locked");
        } else {
            warn!("{context} running with best-effort timing: {outcome:?}");
        }
        outcome
    }
}

fn record(result: RtResult<()>) -> Step {
    match result {
        Ok(()) => Step::Applied,
        Err(err) => {
            warn!("{err}");
            Step::Rejected
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Controller that records requests and rejects the configured ones.
    #[derive(Default)]
    pub struct RecordingRt {
        pub calls: Mutex<Vec<&'static str>>,
        pub reject_elevate: bool,
    }

    impl RtController for RecordingRt {
        fn elevate(&self, priority: Priority) -> RtResult<()> {
            self.calls.lock().unwrap().push("elevate");
            if self.reject_elevate {
                return Err(RtError::SchedulerChangeRejected {
                    priority: match priority {
                        Priority::Max => 99,
                        Priority::Level(level) => level,
                    },
                    source: std::io::Error::from_raw_os_error(libc::EPERM),
                });
            }
            Ok(())
        }

        fn lock_memory(&self) -> RtResult<()> {
            self.calls.lock().unwrap().push("lock_memory");
            Ok(())
        }

        fn pin_to_processor(&self, _context: ContextId, _processor: usize) -> RtResult<()> {
            self.calls.lock().unwrap().push("pin");
            Ok(())
        }
    }
}
