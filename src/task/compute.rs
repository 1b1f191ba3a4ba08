/// Deterministic, bounded-time transform over a fixed-size buffer. The
/// mapping context brackets one call with clock readings.
pub trait MappingComputation: Send {
    fn name(&self) -> &'static str;
    fn map(&mut self, out: &mut [u32]);
}

/// Amplitude of each rail, 1/sqrt(2) in Q15.
const RAIL: i16 = 0x5A82;

/// Maps a PRBS-15 bit stream onto Gray-coded QPSK symbols. Each output word
/// packs the in-phase rail in the high half and the quadrature rail in the
/// low half. The generator restarts from its seed on every call, so each
/// pass does identical work.
#[derive(Debug, Clone)]
pub struct ModulationMapper {
    seed: u16,
    state: u16,
}

impl ModulationMapper {
    pub fn new(seed: u16) -> Self {
        // An all-zero register never leaves zero.
        let seed = match seed & 0x7FFF {
            0 => 0x7FFF,
            seed => seed,
        };
        Self { seed, state: seed }
    }

    fn next_bit(&mut self) -> u16 {
        let bit = ((self.state >> 14) ^ (self.state >> 13)) & 1;
        self.state = ((self.state << 1) | bit) & 0x7FFF;
        bit
    }

    fn symbol(i_bit: u16, q_bit: u16) -> u32 {
        let rail = |bit: u16| if bit == 0 { RAIL } else { -RAIL };
        ((rail(i_bit) as u16 as u32) << 16) | rail(q_bit) as u16 as u32
    }
}

impl Default for ModulationMapper {
    fn default() -> Self {
        Self::new(0x7FFF)
    }
}

impl MappingComputation for ModulationMapper {
    fn name(&self) -> &'static str {
        "qpsk-prbs15"
    }

    fn map(&mut self, out: &mut [u32]) {
        self.state = self.seed;
        for word in out.iter_mut() {
            let i_bit = self.next_bit();
            let q_bit = self.next_bit();
            *word = Self::symbol(i_bit, q_bit);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn every_pass_produces_the_same_symbols() {
        let mut mapper = ModulationMapper::default();
        let mut first = vec![0u32; 1024];
        let mut second = vec![0u32; 1024];
        mapper.map(&mut first);
        mapper.map(&mut second);
        assert_eq!(first, second, "mapping must be deterministic across passes");
    }

    #[test]
    fn output_uses_the_four_constellation_points() {
        let mut mapper = ModulationMapper::default();
        let mut out = vec![0u32; 256];
        mapper.map(&mut out);
        let points: BTreeSet<u32> = out.iter().copied().collect();
        assert_eq!(points.len(), 4, "QPSK has exactly four symbols");
        assert!(points.contains(&0x5A82_5A82));
        assert!(points.contains(&0xA57E_A57E));
    }

    #[test]
    fn generator_has_maximal_period() {
        let mut mapper = ModulationMapper::new(0x1234);
        for _ in 0..0x7FFF {
            mapper.next_bit();
        }
        assert_eq!(mapper.state, 0x1234, "PRBS-15 repeats after 2^15 - 1 bits");
    }

    #[test]
    fn zero_seed_is_replaced() {
        let mut mapper = ModulationMapper::new(0);
        let mut out = [0u32; 8];
        mapper.map(&mut out);
        assert_ne!(mapper.state, 0);
    }
}
