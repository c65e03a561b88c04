//! Randomized exponential backoff for remote spin loops

use super::Fabric;

/// Simple xorshift PRNG (never yields zero from a non-zero seed)
#[derive(Debug, Clone, Copy)]
pub struct XorShift64(u64);

impl XorShift64 {
    pub const fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift
        Self(seed | 1)
    }

    #[inline]
    pub fn step(mut r: u64) -> u64 {
        r ^= r << 13;
        r ^= r >> 7;
        r ^= r << 17;
        r
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.0 = Self::step(self.0);
        self.0
    }

    /// Uniform-ish value in `0..bound` (`bound` > 0)
    #[inline]
    pub fn below(&mut self, bound: u32) -> u32 {
        (self.next_u64() % bound as u64) as u32
    }
}

/// Exponential backoff with a randomized spin count inside each window
pub struct Backoff {
    window: u32,
    min: u32,
    max: u32,
    rng: XorShift64,
    rounds: u64,
}

impl Backoff {
    pub fn new(min_spins: u32, max_spins: u32, seed: u64) -> Self {
        let min = min_spins.max(1);
        Self {
            window: min,
            min,
            max: max_spins.max(min),
            rng: XorShift64::new(seed),
            rounds: 0,
        }
    }

    /// Spin a random number of times in the current window, then double
    /// the window (bounded)
    pub fn spin(&mut self, fabric: &dyn Fabric) -> u32 {
        let spins = self.rng.below(self.window) + 1;
        fabric_spin(fabric, spins);
        self.window = self.window.saturating_mul(2).min(self.max);
        self.rounds += 1;
        spins
    }

    /// Back to the smallest window
    pub fn reset(&mut self) {
        self.window = self.min;
    }

    /// Rounds spun since creation
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn window(&self) -> u32 {
        self.window
    }
}

fn fabric_spin(fabric: &dyn Fabric, spins: u32) -> u32 {
    for _ in 0..spins {
        fabric.cpu_relax();
    }
    spins
}
