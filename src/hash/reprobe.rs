//! Reprobe sequence shared by insertion and lookup
//!
//! Every key has a home slot derived from a mixing hash of the key. When the
//! home slot is taken by another key, the table tries the slots at the
//! quadratic offsets `i * (i + 1) / 2` for `i` in `1..=limit`. Insertion and
//! lookup must walk exactly the same sequence, so both go through
//! [`ReprobeSequence`].

/// Finalizer of MurmurHash3, a bijection on `u64`
#[inline]
#[must_use]
pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

/// The bounded sequence of slot offsets tried for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReprobeSequence {
    /// Offset of every probe from the home slot (`offsets[0] == 0`)
    offsets: Vec<u64>,
}
impl ReprobeSequence {
    /// Builds the quadratic sequence allowing `limit` reprobes after the home slot
    #[must_use]
    pub fn quadratic(limit: usize) -> Self {
        let offsets = (0..=limit as u64).map(|i| i * (i + 1) / 2).collect();
        Self { offsets }
    }

    /// Number of reprobes allowed after the home slot
    #[must_use]
    pub fn limit(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Offset of the last allowed reprobe
    #[must_use]
    pub fn max_offset(&self) -> u64 {
        self.offsets[self.offsets.len() - 1]
    }

    /// Home slot of a key in a table of `mask + 1` slots
    #[inline]
    #[must_use]
    pub fn home(key: u64, mask: u64) -> u64 {
        mix64(key) & mask
    }

    /// Iterates over the slots probed for `key` in a table of `mask + 1` slots
    pub fn slots(&self, key: u64, mask: u64) -> impl Iterator<Item = usize> + '_ {
        let home = Self::home(key, mask);
        self.offsets
            .iter()
            .map(move |offset| (home.wrapping_add(*offset) & mask) as usize)
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_quadratic_offsets() {
        let seq = ReprobeSequence::quadratic(5);
        assert_eq!(seq.limit(), 5);
        assert_eq!(seq.offsets, vec![0, 1, 3, 6, 10, 15]);
        assert_eq!(seq.max_offset(), 15);
    }

    #[test]
    fn test_slots_are_deterministic_and_bounded() {
        let seq = ReprobeSequence::quadratic(100);
        let mask = 1023;
        for key in [0u64, 1, 42, 0x3fff_ffff_ffff_ffff] {
            let first: Vec<_> = seq.slots(key, mask).collect();
            let second: Vec<_> = seq.slots(key, mask).collect();
            assert_eq!(first, second);
            assert_eq!(first.len(), 101);
            assert!(first.iter().all(|&slot| slot <= mask as usize));
            assert_eq!(first[0] as u64, ReprobeSequence::home(key, mask));
        }
    }

    #[test]
    fn test_mix_spreads_neighbouring_keys() {
        let mask = 0xffff;
        let homes: std::collections::HashSet<_> = (0..1000u64)
            .map(|key| ReprobeSequence::home(key, mask))
            .collect();
        assert!(homes.len() > 950);
    }
}
