//! Physical register and memory windows mapped through a memory device file
//! (normally `/dev/mem`). The window keeps the mapping base in an atomic
//! pointer: null is the sentinel for "not mapped", which covers a failed open,
//! a failed `mmap` and a completed teardown alike.
use std::{
    fs::{File, OpenOptions},
    io,
    ops::Range,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::Path,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use log::{debug, error, info};

use super::{AccessMode, Device, DeviceError, DeviceResult, Endianness, check_access};

/// Physical extent a window covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRange {
    pub base: u64,
    pub len: usize,
    pub mode: AccessMode,
}

pub struct MmioWindow {
    name: String,
    range: WindowRange,
    file: Option<File>,
    mapping: AtomicPtr<u8>,
    // Distance between the page-aligned mapping start and `range.base`.
    delta: usize,
    map_len: usize,
}

impl MmioWindow {
    /// Opens the device file backing the window. The window is not mapped yet.
    pub fn open(name: impl Into<String>, range: WindowRange, device: &Path) -> DeviceResult<Self> {
        let name = name.into();
        let file = OpenOptions::new()
            .read(true)
            .write(range.mode.writable())
            .custom_flags(libc::O_SYNC)
            .open(device)
            .map_err(|source| DeviceError::CannotOpenDevice {
                window: name.clone(),
                path: device.display().to_string(),
                source,
            })?;
        let mut window = Self::sentinel(name, range);
        window.file = Some(file);
        Ok(window)
    }

    /// A window that was never mapped. Every access reports `Unmapped`.
    pub fn sentinel(name: impl Into<String>, range: WindowRange) -> Self {
        Self {
            name: name.into(),
            range,
            file: None,
            mapping: AtomicPtr::new(ptr::null_mut()),
            delta: 0,
            map_len: 0,
        }
    }

    /// Open and map in one step. Failures are logged and leave the window in
    /// its sentinel state rather than aborting the caller.
    pub fn establish(name: impl Into<String>, range: WindowRange, device: &Path) -> Self {
        let name = name.into();
        info!("opening {} for window '{}'", device.display(), name);
        let mut window = match Self::open(name.clone(), range, device) {
            Ok(window) => window,
            Err(err) => {
                error!("{err}");
                return Self::sentinel(name, range);
            }
        };
        if let Err(err) = window.map() {
            error!("{err}");
        }
        window
    }

    /// Maps `range.len` bytes starting at `range.base`. The request is widened
    /// to whole pages; only the requested extent is accessible afterwards.
    pub fn map(&mut self) -> DeviceResult<()> {
        if self.is_mapped() {
            return Ok(());
        }
        let Some(file) = self.file.as_ref() else {
            return Err(self.mapping_failed(io::Error::new(
                io::ErrorKind::NotFound,
                "device file is not open",
            )));
        };
        if self.range.len == 0 {
            return Err(self.mapping_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-length window",
            )));
        }

        let page = page_size();
        let aligned = self.range.base & !(page as u64 - 1);
        let delta = (self.range.base - aligned) as usize;
        let map_len = (delta + self.range.len).div_ceil(page) * page;
        let offset = libc::off64_t::try_from(aligned).map_err(|_| {
            self.mapping_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "base address exceeds the platform file offset range",
            ))
        })?;

        // SAFETY: a fresh shared mapping is requested at a kernel chosen
        // address; no existing Rust object is aliased by it.
        let base = unsafe {
            libc::mmap64(
                ptr::null_mut(),
                map_len,
                self.range.mode.prot(),
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(self.mapping_failed(io::Error::last_os_error()));
        }

        self.delta = delta;
        self.map_len = map_len;
        self.mapping.store(base.cast(), Ordering::Release);
        debug!(
            "window '{}' mapped: 0x{:08X} (+0x{:X}), {} bytes in {} pages",
            self.name,
            aligned,
            delta,
            self.range.len,
            map_len / page
        );
        Ok(())
    }

    pub fn range(&self) -> WindowRange {
        self.range
    }

    fn mapping_failed(&self, source: io::Error) -> DeviceError {
        DeviceError::MappingFailed {
            window: self.name.clone(),
            base: self.range.base,
            len: self.range.len,
            source,
        }
    }

    fn locate(&self, offset: usize, len: usize, access: AccessMode) -> DeviceResult<*mut u8> {
        check_access(self, offset, len, access)?;
        let base = self.mapping.load(Ordering::Acquire);
        if base.is_null() {
            return Err(DeviceError::Unmapped {
                window: self.name.clone(),
            });
        }
        // SAFETY: `check_access` bounded `offset + len` by `range.len`, which
        // lies inside the `map_len` bytes mapped at `base + delta`.
        Ok(unsafe { base.add(self.delta + offset) })
    }
}

impl Device for MmioWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn span(&self) -> Range<usize> {
        0..self.range.len
    }

    fn mode(&self) -> AccessMode {
        self.range.mode
    }

    fn endianness(&self) -> Endianness {
        Endianness::NATIVE
    }

    fn is_mapped(&self) -> bool {
        !self.mapping.load(Ordering::Acquire).is_null()
    }

    fn read_u8(&self, offset: usize) -> DeviceResult<u8> {
        let addr = self.locate(offset, 1, AccessMode::READ)?;
        // SAFETY: `addr` is a validated byte inside the live mapping.
        Ok(unsafe { addr.read_volatile() })
    }

    fn write_u8(&self, offset: usize, value: u8) -> DeviceResult<()> {
        let addr = self.locate(offset, 1, AccessMode::WRITE)?;
        // SAFETY: `addr` is a validated byte inside the live mapping.
        unsafe { addr.write_volatile(value) };
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> DeviceResult<u32> {
        let addr = self.locate(offset, 4, AccessMode::READ)?;
        if addr.align_offset(4) == 0 {
            // SAFETY: aligned and four validated bytes inside the mapping.
            return Ok(unsafe { addr.cast::<u32>().read_volatile() });
        }
        let mut raw = [0u8; 4];
        for (idx, byte) in raw.iter_mut().enumerate() {
            // SAFETY: each byte lies inside the validated four byte range.
            *byte = unsafe { addr.add(idx).read_volatile() };
        }
        Ok(Endianness::NATIVE.word_from_bytes(raw))
    }

    fn write_u32(&self, offset: usize, value: u32) -> DeviceResult<()> {
        let addr = self.locate(offset, 4, AccessMode::WRITE)?;
        if addr.align_offset(4) == 0 {
            // SAFETY: aligned and four validated bytes inside the mapping.
            unsafe { addr.cast::<u32>().write_volatile(value) };
            return Ok(());
        }
        for (idx, byte) in Endianness::NATIVE.word_to_bytes(value).into_iter().enumerate() {
            // SAFETY: each byte lies inside the validated four byte range.
            unsafe { addr.add(idx).write_volatile(byte) };
        }
        Ok(())
    }

    fn unmap(&self) -> DeviceResult<()> {
        let base = self.mapping.swap(ptr::null_mut(), Ordering::AcqRel);
        if base.is_null() {
            return Ok(());
        }
        // SAFETY: `base`/`map_len` describe the mapping created in `map`, and
        // the swap above guarantees it is released once.
        if unsafe { libc::munmap(base.cast(), self.map_len) } != 0 {
            return Err(DeviceError::UnmapFailed {
                window: self.name.clone(),
                source: io::Error::last_os_error(),
            });
        }
        debug!("window '{}' unmapped", self.name);
        Ok(())
    }
}

impl Drop for MmioWindow {
    fn drop(&mut self) {
        if let Err(err) = Device::unmap(self) {
            error!("{err}");
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory safety preconditions.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(len: usize) -> WindowRange {
        WindowRange {
            base: 0xFF70_9000,
            len,
            mode: AccessMode::READ_WRITE,
        }
    }

    #[test]
    fn missing_device_file_reports_cannot_open() {
        let err = MmioWindow::open("gpio1", range(4096), Path::new("/nonexistent/rtmap-mem"))
            .err()
            .expect("open must fail");
        assert!(matches!(err, DeviceError::CannotOpenDevice { .. }), "got {err}");
    }

    #[test]
    fn failed_establish_leaves_sentinel_window() {
        let window = MmioWindow::establish("gpio1", range(4096), Path::new("/nonexistent/rtmap-mem"));
        assert!(!window.is_mapped(), "window should stay in the sentinel state");
        assert!(matches!(window.read_u32(0), Err(DeviceError::Unmapped { .. })));
        assert!(window.unmap().is_ok(), "tearing down a sentinel window is a no-op");
    }

    #[test]
    fn sentinel_cannot_be_mapped_without_a_device() {
        let mut window = MmioWindow::sentinel("mem", range(64));
        assert!(matches!(window.map(), Err(DeviceError::MappingFailed { .. })));
        assert!(!window.is_mapped());
    }
}
