use std::{fmt, sync::Arc};

use crate::soc::device::{AccessMode, Device, DeviceError, DeviceResult, check_access};

const ENTRY_BYTES: usize = 4;

/// Append-only array of interval samples kept in on-chip memory.
///
/// The write position is owned by the log, not derived from the shared
/// counter. A single context appends; the array is read back only once every
/// context has joined, so no lock guards it.
pub struct MeasurementLog {
    window: Arc<dyn Device>,
    offset: usize,
    capacity: usize,
    len: usize,
}

impl MeasurementLog {
    /// Claims `capacity` entries at `offset`. Fails on an unmapped window or
    /// when the array does not fit, so a log that exists is always backed.
    pub fn attach(window: Arc<dyn Device>, offset: usize, capacity: usize) -> DeviceResult<Self> {
        let bytes = capacity.checked_mul(ENTRY_BYTES).ok_or(DeviceError::OutOfRange {
            offset,
            len: usize::MAX,
            capacity: window.span().len(),
        })?;
        check_access(window.as_ref(), offset, bytes, AccessMode::READ_WRITE)?;
        Ok(Self {
            window,
            offset,
            capacity,
            len: 0,
        })
    }

    /// Appends one sample. Returns `Ok(false)` once the log is full; the
    /// sample is discarded and nothing past the capacity is written.
    pub fn record(&mut self, nanos: u32) -> DeviceResult<bool> {
        if self.is_full() {
            return Ok(false);
        }
        self.window.write_u32(self.offset + self.len * ENTRY_BYTES, nanos)?;
        self.len += 1;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Reads the recorded samples back out of the window.
    pub fn entries(&self) -> DeviceResult<Vec<u32>> {
        (0..self.len)
            .map(|idx| self.window.read_u32(self.offset + idx * ENTRY_BYTES))
            .collect()
    }
}

impl fmt::Debug for MeasurementLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementLog")
            .field("window", &self.window.name())
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementSummary {
    pub count: usize,
    pub min: u32,
    pub max: u32,
    pub mean: u32,
}

impl MeasurementSummary {
    pub fn of(entries: &[u32]) -> Option<Self> {
        let min = *entries.iter().min()?;
        let max = *entries.iter().max()?;
        let total: u64 = entries.iter().map(|ns| u64::from(*ns)).sum();
        Some(Self {
            count: entries.len(),
            min,
            max,
            mean: (total / entries.len() as u64) as u32,
        })
    }
}
