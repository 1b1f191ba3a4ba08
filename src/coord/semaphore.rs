use std::sync::{Condvar, Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("signal channel closed and drained")]
pub struct Closed;

#[derive(Default)]
struct Permits {
    available: u32,
    closed: bool,
}

/// Counting signal used for producer to consumer pacing. It carries no data
/// and provides no mutual exclusion. The signalling side closes it when it
/// stops; the waiting side stops once it is closed and empty.
#[derive(Default)]
pub struct SignalChannel {
    permits: Mutex<Permits>,
    ready: Condvar,
}

impl SignalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one permit and wakes at most one waiter.
    pub fn signal(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        permits.available = permits.available.saturating_add(1);
        self.ready.notify_one();
    }

    /// No further signals will be posted. Wakes every waiter.
    pub fn close(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        permits.closed = true;
        self.ready.notify_all();
    }

    /// Blocks until a permit is available and takes it. Permits posted before
    /// the channel closed are still handed out; `Closed` is returned only once
    /// none are left.
    pub fn await_signal(&self) -> Result<(), Closed> {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if permits.available > 0 {
                permits.available -= 1;
                return Ok(());
            }
            if permits.closed {
                return Err(Closed);
            }
            permits = self.ready.wait(permits).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn pending(&self) -> u32 {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner).available
    }
}
