//! A small xorshift128+ pseudo-random number generator for effects that need randomness (the strum
//! engine's Random direction). Not cryptographically secure; seedable so tests are reproducible.

/// xorshift128+ state. The seed is stretched through splitmix64 so that small seeds still produce
/// well-mixed state.
#[derive(Clone, Debug)]
pub(crate) struct Rng {
    s0: u64,
    s1: u64,
}

impl Default for Rng {
    fn default() -> Self {
        Self::from_seed(0x9E37_79B9_7F4A_7C15)
    }
}

impl Rng {
    pub(crate) fn from_seed(seed: u64) -> Self {
        let mut state = seed;
        let s0 = splitmix64(&mut state);
        let mut s1 = splitmix64(&mut state);
        // xorshift128+ state must not be all zeros
        if s0 == 0 && s1 == 0 {
            s1 = 1;
        }
        Self { s0, s1 }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.s0;
        let y = self.s1;
        self.s0 = y;
        x ^= x << 23;
        self.s1 = x ^ y ^ (x >> 17) ^ (y >> 26);
        self.s1.wrapping_add(y)
    }

    /// Draws an index in `0..bound`. `bound` must be nonzero.
    pub(crate) fn next_index(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Rng::from_seed(42);
        let mut b = Rng::from_seed(42);

        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64(), "Expected left but got right");
        }
    }

    #[test]
    fn indices_stay_in_bounds() {
        let mut rng = Rng::default();
        for _ in 0..256 {
            assert!(rng.next_index(8) < 8);
        }
    }
}
