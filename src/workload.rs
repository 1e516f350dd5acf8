//! Seeded synthetic task sets.
//!
//! Each generated task is a pipeline whose total load is split into segments
//! of 1 to 5 units. Periods divide 180 so the hyperperiod stays short.

#![forbid(unsafe_code)]

use crate::affinity::Affinity;
use crate::builder::PipelineSpec;
use crate::error::{SimError, SimResult};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Periods a generated task may take.
pub const PERIODS: [u64; 10] = [12, 15, 18, 20, 30, 36, 45, 60, 90, 180];

const MIN_SEGMENT: u64 = 1;
const MAX_SEGMENT: u64 = 5;

/// Reproducible source of pipeline task sets.
#[derive(Debug, Clone)]
pub struct TasksetGenerator {
    rng: SmallRng,
    segment_count: usize,
    affinity_cycle: Vec<Affinity>,
}

impl TasksetGenerator {
    /// Five segments per task, alternating CPU and GPU.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            segment_count: 5,
            affinity_cycle: vec![Affinity::Cpu, Affinity::Gpu],
        }
    }

    /// Segments per task, at least one.
    pub fn with_segment_count(mut self, count: usize) -> Self {
        self.segment_count = count.max(1);
        self
    }

    /// Affinities cycled along each pipeline.
    pub fn with_affinity_cycle(mut self, cycle: Vec<Affinity>) -> Self {
        self.affinity_cycle = cycle;
        self
    }

    /// Split `total` units into `segment_count` shuffled parts, each in `[1, 5]`.
    pub fn segmentation(&mut self, total: u64) -> SimResult<Vec<f64>> {
        let n = self.segment_count as u64;
        if total < n * MIN_SEGMENT || total > n * MAX_SEGMENT {
            return Err(SimError::InvalidParameter(format!(
                "load {} cannot be split into {} segments of {}..={}",
                total, n, MIN_SEGMENT, MAX_SEGMENT
            )));
        }
        let mut parts = Vec::with_capacity(self.segment_count);
        let mut remain = total;
        for placed in 0..n {
            let left = n - placed;
            // Keep the rest splittable: every later part needs at least 1, at most 5.
            let upper = MAX_SEGMENT.min(remain - (left - 1) * MIN_SEGMENT);
            let lower = MIN_SEGMENT.max(remain.saturating_sub((left - 1) * MAX_SEGMENT));
            let part = self.rng.gen_range(lower..=upper);
            remain -= part;
            parts.push(part as f64);
        }
        parts.shuffle(&mut self.rng);
        Ok(parts)
    }

    /// Per-task utilizations summing to `total` (UUniFast).
    fn split_utilization(&mut self, count: usize, total: f64) -> Vec<f64> {
        let mut shares = Vec::with_capacity(count);
        let mut sum = total;
        for i in 1..count {
            let next = sum * self.rng.gen::<f64>().powf(1.0 / (count - i) as f64);
            shares.push(sum - next);
            sum = next;
        }
        if count > 0 {
            shares.push(sum);
        }
        shares
    }

    /// `count` pipeline tasks with a combined utilization close to `utilization`.
    ///
    /// Loads are clamped to what the segment bounds and the period allow, so
    /// the achieved utilization may fall short for extreme targets.
    pub fn generate(&mut self, count: usize, utilization: f64) -> SimResult<Vec<PipelineSpec>> {
        if !utilization.is_finite() || utilization <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "target utilization {} must be positive",
                utilization
            )));
        }
        if self.affinity_cycle.is_empty() {
            return Err(SimError::InvalidParameter(
                "affinity cycle is empty".to_string(),
            ));
        }
        let n = self.segment_count as u64;
        let shares = self.split_utilization(count, utilization);
        let mut specs = Vec::with_capacity(count);
        for share in shares {
            let candidates: Vec<u64> = PERIODS.iter().copied().filter(|&p| p >= n).collect();
            let period = *candidates.choose(&mut self.rng).ok_or_else(|| {
                SimError::InvalidParameter(format!("no period fits {} segments", n))
            })?;
            let ceiling = (n * MAX_SEGMENT).min(period);
            let load = ((share * period as f64).round() as u64).clamp(n * MIN_SEGMENT, ceiling);
            let lengths = self.segmentation(load)?;
            specs.push(PipelineSpec::new(self.affinity_cycle.clone(), lengths, period));
        }
        Ok(specs)
    }
}
