//! `RtController` backed by the Linux scheduler: SCHED_FIFO through
//! `pthread_setschedparam`, `mlockall` and `pthread_setaffinity_np`.
use std::{fmt, io, mem};

use log::debug;

use super::{Priority, RtController, RtError, RtResult};

/// OS identity of an execution context, captured from inside the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextId {
    thread: libc::pthread_t,
    tid: libc::pid_t,
}

impl ContextId {
    pub fn current() -> Self {
        // SAFETY: both calls only query the calling thread.
        unsafe {
            Self {
                thread: libc::pthread_self(),
                tid: libc::syscall(libc::SYS_gettid) as libc::pid_t,
            }
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} tid {}", std::process::id(), self.tid)
    }
}

pub struct LinuxRt;

impl LinuxRt {
    fn fifo_range() -> RtResult<(i32, i32)> {
        // SAFETY: plain queries without pointers.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(libc::SCHED_FIFO),
                libc::sched_get_priority_max(libc::SCHED_FIFO),
            )
        };
        if min < 0 || max < 0 {
            return Err(RtError::SchedulerChangeRejected {
                priority: max,
                source: io::Error::last_os_error(),
            });
        }
        Ok((min, max))
    }
}

impl RtController for LinuxRt {
    fn elevate(&self, priority: Priority) -> RtResult<()> {
        let (min, max) = Self::fifo_range()?;
        let level = match priority {
            Priority::Max => max,
            Priority::Level(level) => level,
        };
        if level < min || level > max {
            return Err(RtError::SchedulerChangeRejected {
                priority: level,
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }
        // SAFETY: sched_param is plain data; all-zero is a valid value.
        let mut param: libc::sched_param = unsafe { mem::zeroed() };
        param.sched_priority = level;
        // SAFETY: `param` outlives the call; the target is the calling thread.
        let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
        if rc != 0 {
            return Err(RtError::SchedulerChangeRejected {
                priority: level,
                source: io::Error::from_raw_os_error(rc),
            });
        }
        debug!("scheduler set to SCHED_FIFO priority {level}");
        Ok(())
    }

    fn lock_memory(&self) -> RtResult<()> {
        // SAFETY: mlockall takes flags only.
        if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
            return Err(RtError::LockRejected {
                source: io::Error::last_os_error(),
            });
        }
        debug!("process memory locked");
        Ok(())
    }

    fn pin_to_processor(&self, context: ContextId, processor: usize) -> RtResult<()> {
        let rejected = |reason: String| RtError::AffinityRejected { processor, reason };
        if processor >= libc::CPU_SETSIZE as usize {
            return Err(rejected(format!(
                "index exceeds CPU_SETSIZE ({})",
                libc::CPU_SETSIZE
            )));
        }

        // SAFETY: cpu_set_t is a plain bitmask; the sets live across the
        // calls and their exact size is passed alongside.
        let (rc, applied) = unsafe {
            let mut wanted: libc::cpu_set_t = mem::zeroed();
            libc::CPU_ZERO(&mut wanted);
            libc::CPU_SET(processor, &mut wanted);
            let rc = libc::pthread_setaffinity_np(context.thread, mem::size_of::<libc::cpu_set_t>(), &wanted);
            if rc != 0 {
                (rc, None)
            } else {
                let mut actual: libc::cpu_set_t = mem::zeroed();
                let rc = libc::pthread_getaffinity_np(
                    context.thread,
                    mem::size_of::<libc::cpu_set_t>(),
                    &mut actual,
                );
                (rc, Some(libc::CPU_ISSET(processor, &actual) && libc::CPU_COUNT(&actual) == 1))
            }
        };
        match (rc, applied) {
            (0, Some(true)) => {
                debug!("{context} pinned to processor {processor}");
                Ok(())
            }
            (0, _) => Err(rejected("affinity mask did not take effect".into())),
            (rc, _) => Err(rejected(io::Error::from_raw_os_error(rc).to_string())),
        }
    }
}
