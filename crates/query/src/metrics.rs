use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_selections: AtomicUsize,
    successful_selections: AtomicUsize,
    failed_selections: AtomicUsize,
    empty_selections: AtomicUsize,

    // Per-chunk outcomes
    chunks_scored: AtomicUsize,
    chunks_excluded: AtomicUsize,
    chunk_timeouts: AtomicUsize,

    // Timing (in microseconds)
    total_selection_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_selections: AtomicUsize::new(0),
            successful_selections: AtomicUsize::new(0),
            failed_selections: AtomicUsize::new(0),
            empty_selections: AtomicUsize::new(0),
            chunks_scored: AtomicUsize::new(0),
            chunks_excluded: AtomicUsize::new(0),
            chunk_timeouts: AtomicUsize::new(0),
            total_selection_time_us: AtomicU64::new(0),
        })
    }

    /// Record one finished selection. `empty` marks a successful call that
    /// found no relevant content.
    pub fn record_selection(&self, duration: Duration, success: bool, empty: bool) {
        self.total_selections.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_selections.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_selections.fetch_add(1, Ordering::Relaxed);
        }
        if empty {
            self.empty_selections.fetch_add(1, Ordering::Relaxed);
        }
        self.total_selection_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_chunks(&self, scored: usize, excluded: usize) {
        self.chunks_scored.fetch_add(scored, Ordering::Relaxed);
        self.chunks_excluded.fetch_add(excluded, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.chunk_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_selections.load(Ordering::Relaxed);
        let total_us = self.total_selection_time_us.load(Ordering::Relaxed) as f64;

        MetricsSnapshot {
            total_selections: total,
            successful_selections: self.successful_selections.load(Ordering::Relaxed),
            failed_selections: self.failed_selections.load(Ordering::Relaxed),
            empty_selections: self.empty_selections.load(Ordering::Relaxed),
            chunks_scored: self.chunks_scored.load(Ordering::Relaxed),
            chunks_excluded: self.chunks_excluded.load(Ordering::Relaxed),
            chunk_timeouts: self.chunk_timeouts.load(Ordering::Relaxed),
            avg_selection_time_ms: if total > 0 {
                total_us / total as f64 / 1000.0 // Convert to ms
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_selections: usize,
    pub successful_selections: usize,
    pub failed_selections: usize,
    pub empty_selections: usize,
    pub chunks_scored: usize,
    pub chunks_excluded: usize,
    pub chunk_timeouts: usize,
    pub avg_selection_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
