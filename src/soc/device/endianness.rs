/// Byte order used when a 32-bit register value has to be assembled from, or
/// split into, individual byte accesses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    pub const NATIVE: Self = if cfg!(target_endian = "big") {
        Endianness::Big
    } else {
        Endianness::Little
    };

    #[inline(always)]
    pub fn word_from_bytes(self, bytes: [u8; 4]) -> u32 {
        match self {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        }
    }

    #[inline(always)]
    pub fn word_to_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_order_is_honoured_both_ways() {
        let value = 0x1122_3344;
        assert_eq!(Endianness::Little.word_to_bytes(value), [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(Endianness::Big.word_to_bytes(value), [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(Endianness::Big.word_from_bytes([0x11, 0x22, 0x33, 0x44]), value);
    }
}
