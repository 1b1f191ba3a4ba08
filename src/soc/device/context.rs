use bitflags::bitflags;

bitflags! {
    /// Access rights a window was opened with. Mirrors the `PROT_*` flags the
    /// mapping is created with.
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct AccessMode: u8 {
        const READ  = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl AccessMode {
    pub fn readable(self) -> bool {
        self.contains(AccessMode::READ)
    }

    pub fn writable(self) -> bool {
        self.contains(AccessMode::WRITE)
    }

    pub(crate) fn prot(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.readable() {
            prot |= libc::PROT_READ;
        }
        if self.writable() {
            prot |= libc::PROT_WRITE;
        }
        prot
    }
}

impl Default for AccessMode {
    fn default() -> Self {
        AccessMode::READ_WRITE
    }
}
