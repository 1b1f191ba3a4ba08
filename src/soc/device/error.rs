use std::io;

use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failures surfaced by register and memory windows.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("cannot open device file {path} for window '{window}': {source}")]
    CannotOpenDevice {
        window: String,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("mapping window '{window}' at 0x{base:08X} ({len} bytes) failed: {source}")]
    MappingFailed {
        window: String,
        base: u64,
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("unmapping window '{window}' failed: {source}")]
    UnmapFailed {
        window: String,
        #[source]
        source: io::Error,
    },
    #[error("window '{window}' is not mapped")]
    Unmapped { window: String },
    #[error("access of {len} bytes at offset 0x{offset:X} exceeds window capacity 0x{capacity:X}")]
    OutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("window '{window}' does not permit {access}")]
    AccessDenied {
        window: String,
        access: &'static str,
    },
}
