//! Deterministic pseudo-random number generator.
//!
//! xoshiro256** over four `u64` words, seeded through splitmix64. Every
//! operation is plain wrapping integer arithmetic so a given seed produces the
//! same sequence on every platform, which is what checkpoint replay relies on.
//!
//! The full generator state is the four words returned by [`DeterministicRng::get_state`];
//! nothing is cached between calls (no spare Gaussian sample).

use serde::{Deserialize, Serialize};

use crate::simulation::error::{SimError, SimResult};
use crate::simulation::states::NVec3;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Number of outputs discarded after seeding or deriving
const WARM_UP: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 4],
}

fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// FNV-1a 64-bit hash
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        let state = [
            splitmix64(&mut sm),
            splitmix64(&mut sm),
            splitmix64(&mut sm),
            splitmix64(&mut sm),
        ];
        let mut rng = Self { state };
        rng.warm_up();
        rng
    }

    /// Seed from text (world names, preset keys) via FNV-1a
    pub fn from_str_seed(seed: &str) -> Self {
        Self::new(fnv1a64(seed.as_bytes()))
    }

    fn warm_up(&mut self) {
        for _ in 0..WARM_UP {
            self.next_u64();
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let s = &mut self.state;
        let result = s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = s[1] << 17;

        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];
        s[2] ^= t;
        s[3] = s[3].rotate_left(45);

        result
    }

    /// Uniform float in `[0, 1)` with 53 random bits
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform float in `[lo, hi)`
    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.next_f64() * (hi - lo)
    }

    /// Uniform integer in `[0, n)`, unbiased (rejection sampling); 0 when `n == 0`
    pub fn next_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        let zone = u64::MAX - (u64::MAX % n);
        loop {
            let r = self.next_u64();
            if r < zone {
                return r % n;
            }
        }
    }

    /// Normal sample via Box–Muller; consumes exactly two uniforms
    pub fn gaussian(&mut self, mean: f64, sd: f64) -> f64 {
        // 1 - u keeps the log argument in (0, 1]
        let u1 = 1.0 - self.next_f64();
        let u2 = self.next_f64();
        let mag = (-2.0 * u1.ln()).sqrt();
        mean + sd * mag * (std::f64::consts::TAU * u2).cos()
    }

    /// Uniformly distributed direction on the unit sphere
    pub fn unit_vector(&mut self) -> NVec3 {
        let z = 2.0 * self.next_f64() - 1.0;
        let phi = std::f64::consts::TAU * self.next_f64();
        let r = (1.0 - z * z).max(0.0).sqrt();
        NVec3::new(r * phi.cos(), r * phi.sin(), z)
    }

    /// Uniformly distributed point inside a ball of radius `radius`
    pub fn point_in_sphere(&mut self, radius: f64) -> NVec3 {
        let dir = self.unit_vector();
        dir * (radius * self.next_f64().cbrt())
    }

    pub fn get_state(&self) -> [u64; 4] {
        self.state
    }

    pub fn set_state(&mut self, state: [u64; 4]) -> SimResult<()> {
        if state == [0; 4] {
            return Err(SimError::InvalidState("rng state must not be all zero".into()));
        }
        self.state = state;
        Ok(())
    }

    /// Independent sub-stream for `key`; the parent stream is not advanced
    pub fn derive(&self, key: &str) -> Self {
        let mut sm = fnv1a64(key.as_bytes());
        let mut state = self.state;
        for word in state.iter_mut() {
            *word ^= splitmix64(&mut sm);
        }
        if state == [0; 4] {
            state[0] = 1;
        }
        let mut child = Self { state };
        child.warm_up();
        child
    }
}
