//! Defines the `Device` trait every register or memory window implements.
//! Windows are shared by reference between execution contexts without a lock,
//! so every accessor takes `&self`; ordering of concurrent writes is left to the
//! hardware bus. Each accessor validates the window state, its access mode and
//! the byte range before touching memory, so an unmapped window is never
//! dereferenced.
use std::ops::Range;

use super::{
    context::AccessMode,
    endianness::Endianness,
    error::{DeviceError, DeviceResult},
};

pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    fn span(&self) -> Range<usize>;

    #[inline(always)]
    fn mode(&self) -> AccessMode {
        AccessMode::READ_WRITE
    }

    #[inline(always)]
    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    /// False while the window sits in its sentinel state (open or map failed,
    /// or already torn down).
    #[inline(always)]
    fn is_mapped(&self) -> bool {
        true
    }

    fn read_u8(&self, offset: usize) -> DeviceResult<u8>;
    fn write_u8(&self, offset: usize, value: u8) -> DeviceResult<()>;
    fn read_u32(&self, offset: usize) -> DeviceResult<u32>;
    fn write_u32(&self, offset: usize, value: u32) -> DeviceResult<()>;

    /// Read a contiguous slice of bytes starting at `offset` into `out`.
    fn read(&self, offset: usize, out: &mut [u8]) -> DeviceResult<()> {
        check_access(self, offset, out.len(), AccessMode::READ)?;
        for (idx, byte) in out.iter_mut().enumerate() {
            *byte = self.read_u8(offset + idx)?;
        }
        Ok(())
    }

    /// Write a contiguous slice of bytes starting at `offset`.
    fn write(&self, offset: usize, data: &[u8]) -> DeviceResult<()> {
        check_access(self, offset, data.len(), AccessMode::WRITE)?;
        for (idx, byte) in data.iter().enumerate() {
            self.write_u8(offset + idx, *byte)?;
        }
        Ok(())
    }

    /// Release the backing mapping. Windows without one have nothing to do.
    fn unmap(&self) -> DeviceResult<()> {
        Ok(())
    }
}

/// Validates that `len` bytes at `offset` may be accessed with `access`.
pub fn check_access<D: Device + ?Sized>(
    device: &D,
    offset: usize,
    len: usize,
    access: AccessMode,
) -> DeviceResult<()> {
    if !device.is_mapped() {
        return Err(DeviceError::Unmapped {
            window: device.name().to_string(),
        });
    }
    if !device.mode().contains(access) {
        return Err(DeviceError::AccessDenied {
            window: device.name().to_string(),
            access: if access.writable() { "writes" } else { "reads" },
        });
    }
    let capacity = device.span().len();
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(DeviceError::OutOfRange {
            offset,
            len,
            capacity,
        }),
    }
}
