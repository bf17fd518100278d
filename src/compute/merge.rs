//! Result merging
//!
//! Partial results combine with a per-key sum, which is commutative and
//! associative. [`merge`] folds partials in `chunk_id` order so the floating
//! point energy sum is identical no matter which worker finished first.

use super::aggregator::PartialResult;
use super::strategy::ExecutionMethod;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final statistics for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total: u64,
    pub status_counts: BTreeMap<String, u64>,
    pub sensor_counts: BTreeMap<String, u64>,
    pub energy_sum: f64,
    pub high_energy_count: u64,
    pub average_energy: f64,
    pub chunks_processed: usize,
    pub method: ExecutionMethod,
    pub num_workers: usize,
    /// Wall-clock time of the whole run in seconds
    #[serde(default)]
    pub elapsed_secs: f64,
}

impl AggregateResult {
    /// Same statistics, ignoring timing
    pub fn same_statistics(&self, other: &AggregateResult) -> bool {
        self.total == other.total
            && self.status_counts == other.status_counts
            && self.sensor_counts == other.sensor_counts
            && self.energy_sum.to_bits() == other.energy_sum.to_bits()
            && self.high_energy_count == other.high_energy_count
            && self.chunks_processed == other.chunks_processed
    }
}

impl PartialResult {
    /// Combine two partials into one covering both.
    ///
    /// The combined partial takes the smaller chunk id.
    pub fn combine(mut self, other: PartialResult) -> PartialResult {
        self.chunk_id = self.chunk_id.min(other.chunk_id);
        self.total += other.total;
        add_counts(&mut self.status_counts, other.status_counts);
        add_counts(&mut self.sensor_counts, other.sensor_counts);
        self.energy_sum += other.energy_sum;
        self.high_energy_count += other.high_energy_count;
        self
    }
}

fn add_counts(target: &mut BTreeMap<String, u64>, source: BTreeMap<String, u64>) {
    for (key, count) in source {
        *target.entry(key).or_insert(0) += count;
    }
}

/// Reduce partial results into the final aggregate.
///
/// Fails with `EmptyResultSet` when `partials` is empty.
pub fn merge(
    mut partials: Vec<PartialResult>,
    method: ExecutionMethod,
    num_workers: usize,
) -> Result<AggregateResult> {
    partials.sort_by_key(|partial| partial.chunk_id);
    let chunks_processed = partials.len();

    let combined = partials
        .into_iter()
        .reduce(PartialResult::combine)
        .ok_or(EngineError::EmptyResultSet)?;

    let average_energy = if combined.total > 0 {
        combined.energy_sum / combined.total as f64
    } else {
        0.0
    };

    Ok(AggregateResult {
        total: combined.total,
        status_counts: combined.status_counts,
        sensor_counts: combined.sensor_counts,
        energy_sum: combined.energy_sum,
        high_energy_count: combined.high_energy_count,
        average_energy,
        chunks_processed,
        method,
        num_workers,
        elapsed_secs: 0.0,
    })
}
