//! Progress reporting
//!
//! The engine reports progress through a [`ProgressSink`]. Reports are
//! side-effect only and never drive control flow. [`ChunkProgress`] turns
//! chunk completions arriving from many threads into a monotonic fraction.

use std::sync::{Arc, Mutex};

/// Receiver of progress fractions in `[0, 1]`
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn report(&self, fraction: f64) {
        self(fraction)
    }
}

/// Sink that discards every report
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _fraction: f64) {}
}

/// Count-based progress: `completed_chunks / total_chunks`.
///
/// Reports are forwarded while holding the lock, so the sink observes a
/// non-decreasing sequence even when chunks finish concurrently.
pub struct ChunkProgress {
    sink: Arc<dyn ProgressSink>,
    total_chunks: usize,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    completed: usize,
    last_reported: f64,
}

impl ChunkProgress {
    pub fn new(sink: Arc<dyn ProgressSink>, total_chunks: usize) -> Self {
        Self {
            sink,
            total_chunks,
            state: Mutex::new(ProgressState {
                completed: 0,
                last_reported: 0.0,
            }),
        }
    }

    /// Report an explicit fraction, ignored if it would move progress backwards
    pub fn report(&self, fraction: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.forward(&mut state, fraction);
    }

    /// Record one finished chunk
    pub fn chunk_completed(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.completed = (state.completed + 1).min(self.total_chunks);
        let fraction = if self.total_chunks == 0 {
            1.0
        } else {
            state.completed as f64 / self.total_chunks as f64
        };
        self.forward(&mut state, fraction);
    }

    pub fn completed(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .completed
    }

    fn forward(&self, state: &mut ProgressState, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction < state.last_reported {
            return;
        }
        state.last_reported = fraction;
        self.sink.report(fraction);
    }
}
