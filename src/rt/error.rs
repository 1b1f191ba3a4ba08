use std::io;

use thiserror::Error;

use super::ClockKind;

pub type RtResult<T> = Result<T, RtError>;

#[derive(Debug, Error)]
pub enum RtError {
    #[error("could not change scheduler policy to SCHED_FIFO priority {priority}: {source}")]
    SchedulerChangeRejected {
        priority: i32,
        #[source]
        source: io::Error,
    },
    #[error("could not lock process memory: {source}")]
    LockRejected {
        #[source]
        source: io::Error,
    },
    #[error("could not pin context to processor {processor}: {reason}")]
    AffinityRejected { processor: usize, reason: String },
    #[error("error reading {clock:?} clock: {source}")]
    ClockReadFailed {
        clock: ClockKind,
        #[source]
        source: io::Error,
    },
}
