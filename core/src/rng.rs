//! Deterministic random number generation.
//!
//! RULE: Nothing in the kernel may call any platform RNG.
//! All randomness flows through SampleRng instances derived
//! from the single master seed stored on the ModelConfig.
//!
//! Each PSA sample gets its own RNG stream, seeded deterministically
//! from (master_seed XOR sample_index). This means:
//!   - Samples may be drawn on any worker thread, in any order.
//!   - Raising n_samples never changes the earlier samples' draws.

use crate::types::SampleIndex;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_pcg::Pcg64Mcg;

/// A deterministic RNG for a single PSA sample.
pub struct SampleRng {
    pub sample: SampleIndex,
    inner:      Pcg64Mcg,
}

impl SampleRng {
    /// Create a sample RNG from the master seed and the sample index.
    pub fn new(master_seed: u64, sample: SampleIndex) -> Self {
        let derived_seed = master_seed ^ ((sample as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            sample,
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Draw one value from any `rand_distr` distribution over f64.
    pub fn draw<D: Distribution<f64>>(&mut self, dist: &D) -> f64 {
        dist.sample(&mut self.inner)
    }
}

/// Hands out per-sample streams for a single run.
#[derive(Debug, Clone, Copy)]
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_sample(&self, sample: SampleIndex) -> SampleRng {
        SampleRng::new(self.master_seed, sample)
    }
}
