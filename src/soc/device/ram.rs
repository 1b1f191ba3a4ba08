use std::{
    ops::Range,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::soc::device::{AccessMode, Device, DeviceResult, Endianness, check_access};

/// Heap-backed stand-in for a physical window. Used by the simulation backend
/// and by tests; bytes are atomics so concurrent contexts can share it the same
/// way they share a hardware mapping.
pub struct RamMemory {
    name: String,
    bytes: Box<[AtomicU8]>,
    mode: AccessMode,
    endian: Endianness,
}

impl RamMemory {
    pub fn new(name: impl Into<String>, len: usize, endian: Endianness) -> Self {
        Self {
            name: name.into(),
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
            mode: AccessMode::READ_WRITE,
            endian,
        }
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline(always)]
    fn byte(&self, offset: usize) -> &AtomicU8 {
        &self.bytes[offset]
    }
}

impl Device for RamMemory {
    fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    fn span(&self) -> Range<usize> {
        0..self.len()
    }

    #[inline(always)]
    fn mode(&self) -> AccessMode {
        self.mode
    }

    #[inline(always)]
    fn endianness(&self) -> Endianness {
        self.endian
    }

    fn read_u8(&self, offset: usize) -> DeviceResult<u8> {
        check_access(self, offset, 1, AccessMode::READ)?;
        Ok(self.byte(offset).load(Ordering::Acquire))
    }

    fn write_u8(&self, offset: usize, value: u8) -> DeviceResult<()> {
        check_access(self, offset, 1, AccessMode::WRITE)?;
        self.byte(offset).store(value, Ordering::Release);
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> DeviceResult<u32> {
        check_access(self, offset, 4, AccessMode::READ)?;
        let mut raw = [0u8; 4];
        for (idx, byte) in raw.iter_mut().enumerate() {
            *byte = self.byte(offset + idx).load(Ordering::Acquire);
        }
        Ok(self.endian.word_from_bytes(raw))
    }

    fn write_u32(&self, offset: usize, value: u32) -> DeviceResult<()> {
        check_access(self, offset, 4, AccessMode::WRITE)?;
        for (idx, byte) in self.endian.word_to_bytes(value).into_iter().enumerate() {
            self.byte(offset + idx).store(byte, Ordering::Release);
        }
        Ok(())
    }
}
