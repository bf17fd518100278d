//! Pure chunk planning
//!
//! Splits a row count into contiguous, non-overlapping ranges, one per
//! worker. Every chunk except the last has `floor(total / n)` rows; the last
//! one absorbs the remainder.

use serde::{Deserialize, Serialize};

/// A contiguous range of data rows assigned to one execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub chunk_id: usize,
    /// Zero-based index of the first data row (header excluded)
    pub start_row: u64,
    pub row_count: u64,
}

impl ChunkDescriptor {
    /// One past the last row of the chunk
    pub fn end_row(&self) -> u64 {
        self.start_row + self.row_count
    }
}

/// Number of chunks actually produced for a request.
///
/// Requesting more workers than rows would produce empty chunks, so the
/// count is capped at the number of rows (and never drops below one).
pub fn effective_chunk_count(total_rows: u64, num_workers: usize) -> usize {
    let workers = num_workers.max(1) as u64;
    workers.min(total_rows).max(1) as usize
}

/// Pure: plan chunk assignments for `num_workers` workers over `total_rows`.
///
/// Deterministic given its inputs. The returned chunks partition
/// `[0, total_rows)` exactly.
pub fn plan(total_rows: u64, num_workers: usize) -> Vec<ChunkDescriptor> {
    let chunks = effective_chunk_count(total_rows, num_workers);
    let chunk_size = total_rows / chunks as u64;

    (0..chunks)
        .map(|chunk_id| {
            let start_row = chunk_id as u64 * chunk_size;
            let row_count = if chunk_id == chunks - 1 {
                total_rows - start_row
            } else {
                chunk_size
            };
            ChunkDescriptor {
                chunk_id,
                start_row,
                row_count,
            }
        })
        .collect()
}
