//! Random sources for execution-time variation.
//!
//! A processor with a non-zero variation percentage does slightly less work
//! per tick than nominal. The amount is drawn from a [`NoiseSource`] owned by
//! the simulator, so a run is fully reproducible from its seed.

#![forbid(unsafe_code)]

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Supplies the noise factor for one execution step.
pub trait NoiseSource: Send {
    /// Draw an integer-valued factor uniformly from `[0, floor(variation)]`.
    fn draw(&mut self, variation: f64) -> f64;
}

/// Seeded pseudo-random noise.
#[derive(Debug, Clone)]
pub struct SeededNoise {
    rng: SmallRng,
}

impl SeededNoise {
    /// Create a source that replays the same sequence for the same seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl NoiseSource for SeededNoise {
    fn draw(&mut self, variation: f64) -> f64 {
        if variation < 1.0 {
            return 0.0;
        }
        let upper = variation.floor() as u64;
        self.rng.gen_range(0..=upper) as f64
    }
}

/// Noise that never perturbs execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl NoiseSource for Silent {
    fn draw(&mut self, _variation: f64) -> f64 {
        0.0
    }
}

/// Work done by one execution step.
///
/// `variation` and `parallel_discount` are percentages. The result is clamped
/// at zero so a step never adds work back.
pub fn step_progress(variation: f64, parallel_discount: f64, noise: f64) -> f64 {
    let contention = 1.0 - parallel_discount / 100.0;
    let jitter = 1.0 - variation / 100.0 * noise;
    (contention * jitter).max(0.0)
}
