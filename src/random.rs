//! Reproducible random numbers.
//!
//! [`Mt19937`] is a 32-bit Mersenne Twister. Given the same seed it produces the same sequence
//! on every platform, which the tests rely on. It implements [`rand::RngCore`] and
//! [`rand::SeedableRng`], so it can be passed anywhere the crate accepts a generic `rand`
//! generator.

use rand::{RngCore, SeedableRng};

const STATE_LEN: usize = 624;
const SHIFT: usize = 397;
const MATRIX_A: u32 = 0x9908_b0df;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7fff_ffff;

/// Mersenne Twister (MT19937) generator.
#[derive(Clone)]
pub struct Mt19937 {
    key: [u32; STATE_LEN],
    pos: usize,
}

impl std::fmt::Debug for Mt19937 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mt19937").field("pos", &self.pos).finish()
    }
}

impl Mt19937 {
    /// Create a generator seeded with `seed`.
    pub fn new(seed: u32) -> Self {
        let mut rng = Self {
            key: [0; STATE_LEN],
            pos: STATE_LEN,
        };
        rng.reseed(seed);
        rng
    }

    /// Reset the state as if freshly created with `seed`.
    pub fn reseed(&mut self, mut seed: u32) {
        for (i, slot) in self.key.iter_mut().enumerate() {
            *slot = seed;
            seed = 1_812_433_253_u32
                .wrapping_mul(seed ^ (seed >> 30))
                .wrapping_add(i as u32 + 1);
        }
        self.pos = STATE_LEN;
    }

    fn twist(&mut self) {
        for i in 0..STATE_LEN {
            let y = (self.key[i] & UPPER_MASK) | (self.key[(i + 1) % STATE_LEN] & LOWER_MASK);
            let mag = if y & 1 == 1 { MATRIX_A } else { 0 };
            self.key[i] = self.key[(i + SHIFT) % STATE_LEN] ^ (y >> 1) ^ mag;
        }
        self.pos = 0;
    }

    /// Next tempered 32-bit output.
    pub fn next_raw(&mut self) -> u32 {
        if self.pos == STATE_LEN {
            self.twist();
        }
        let mut y = self.key[self.pos];
        self.pos += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^ (y >> 18)
    }
}

impl Default for Mt19937 {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RngCore for Mt19937 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.next_raw()
    }

    fn next_u64(&mut self) -> u64 {
        let lo = u64::from(self.next_raw());
        let hi = u64::from(self.next_raw());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_raw().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for Mt19937 {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u32::from_le_bytes(seed))
    }

    /// Seeds with the low 32 bits of `state`.
    fn seed_from_u64(state: u64) -> Self {
        Self::new(state as u32)
    }
}

/// Single-precision floats built from two 32-bit draws.
pub trait UnitFloat: RngCore {
    /// Uniform float in `[0, 1)` with 53 bits of entropy rounded to `f32`.
    #[inline]
    fn next_unit_f32(&mut self) -> f32 {
        let a = (self.next_u32() >> 5) as f32;
        let b = (self.next_u32() >> 6) as f32;
        (a * 67_108_864.0 + b) / 9_007_199_254_740_992.0
    }
}

impl<R: RngCore + ?Sized> UnitFloat for R {}
