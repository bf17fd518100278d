//! Per-chunk event aggregation
//!
//! An [`EventAggregator`] accumulates statistics for exactly one chunk and is
//! a pure function of the records it consumes. [`aggregate_chunk`] drives one
//! aggregator over a chunk's row range of the input file.

use super::planner::ChunkDescriptor;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Energy strictly above this value counts as a high-energy event
pub const DEFAULT_ENERGY_THRESHOLD: f64 = 100.0;

/// How many rows are read between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// The subset of an input row the aggregation consumes.
///
/// Other columns (`event_id`, `timestamp`, momenta) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRecord {
    pub sensor_id: String,
    pub energy: f64,
    pub status: String,
}

/// Statistics for one chunk, immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub chunk_id: usize,
    pub total: u64,
    pub status_counts: BTreeMap<String, u64>,
    pub sensor_counts: BTreeMap<String, u64>,
    pub energy_sum: f64,
    pub high_energy_count: u64,
}

/// Stateful accumulator for one chunk
#[derive(Debug)]
pub struct EventAggregator {
    chunk_id: usize,
    threshold: f64,
    total: u64,
    status_counts: BTreeMap<String, u64>,
    sensor_counts: BTreeMap<String, u64>,
    energy_sum: f64,
    high_energy_count: u64,
}

impl EventAggregator {
    pub fn new(chunk_id: usize) -> Self {
        Self::with_threshold(chunk_id, DEFAULT_ENERGY_THRESHOLD)
    }

    pub fn with_threshold(chunk_id: usize, threshold: f64) -> Self {
        Self {
            chunk_id,
            threshold,
            total: 0,
            status_counts: BTreeMap::new(),
            sensor_counts: BTreeMap::new(),
            energy_sum: 0.0,
            high_energy_count: 0,
        }
    }

    /// Fold one record into the running statistics.
    ///
    /// `row` is the record's data-row index and is only used for error
    /// reporting. A rejected record leaves the aggregator unchanged.
    pub fn consume(&mut self, row: u64, record: &EventRecord) -> Result<()> {
        validate(row, record)?;

        self.total += 1;
        increment(&mut self.status_counts, &record.status);
        increment(&mut self.sensor_counts, &record.sensor_id);
        self.energy_sum += record.energy;
        if record.energy > self.threshold {
            self.high_energy_count += 1;
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Project the accumulated state into a [`PartialResult`]
    pub fn snapshot(self) -> PartialResult {
        PartialResult {
            chunk_id: self.chunk_id,
            total: self.total,
            status_counts: self.status_counts,
            sensor_counts: self.sensor_counts,
            energy_sum: self.energy_sum,
            high_energy_count: self.high_energy_count,
        }
    }
}

fn validate(row: u64, record: &EventRecord) -> Result<()> {
    let malformed = |reason: &str| EngineError::MalformedRecord {
        row,
        reason: reason.to_string(),
    };

    if record.status.trim().is_empty() {
        return Err(malformed("missing field `status`"));
    }
    if record.sensor_id.trim().is_empty() {
        return Err(malformed("missing field `sensor_id`"));
    }
    if !record.energy.is_finite() {
        return Err(malformed("field `energy` is not a finite number"));
    }
    Ok(())
}

fn increment(counts: &mut BTreeMap<String, u64>, key: &str) {
    match counts.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            counts.insert(key.to_string(), 1);
        }
    }
}

/// Map a CSV error at `row` onto the engine's taxonomy
fn classify_csv_error(row: u64, err: csv::Error) -> EngineError {
    if err.is_io_error() {
        return EngineError::Csv(err);
    }
    EngineError::MalformedRecord {
        row,
        reason: err.to_string(),
    }
}

/// Aggregate exactly the rows of `chunk` from the CSV file at `path`.
///
/// Fails with `MalformedRecord` on the first bad row and when the input ends
/// before the chunk's last row. Returns `Cancelled` if `cancel` fires.
pub fn aggregate_chunk(
    path: &Path,
    chunk: &ChunkDescriptor,
    threshold: f64,
    cancel: &CancellationToken,
) -> Result<PartialResult> {
    if !path.exists() {
        return Err(EngineError::SourceNotFound(path.to_path_buf()));
    }

    debug!(
        "Chunk {}: processing rows {}..{}",
        chunk.chunk_id,
        chunk.start_row,
        chunk.end_row()
    );

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let headers = reader.byte_headers()?.clone();
    let mut record = csv::ByteRecord::new();
    let mut aggregator = EventAggregator::with_threshold(chunk.chunk_id, threshold);

    for row in 0..chunk.end_row() {
        if row % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            debug!("Chunk {}: cancelled at row {}", chunk.chunk_id, row);
            return Err(EngineError::Cancelled);
        }

        let has_row = reader
            .read_byte_record(&mut record)
            .map_err(|e| classify_csv_error(row, e))?;
        if !has_row {
            return Err(EngineError::MalformedRecord {
                row,
                reason: format!(
                    "unexpected end of input (chunk {} expects rows {}..{})",
                    chunk.chunk_id,
                    chunk.start_row,
                    chunk.end_row()
                ),
            });
        }

        if row < chunk.start_row {
            continue;
        }

        let event: EventRecord = record
            .deserialize(Some(&headers))
            .map_err(|e| classify_csv_error(row, e))?;
        aggregator.consume(row, &event)?;
    }

    trace!(
        "Chunk {}: aggregated {} rows",
        chunk.chunk_id,
        aggregator.total()
    );
    Ok(aggregator.snapshot())
}
