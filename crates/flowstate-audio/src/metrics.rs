//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Counters updated from the producer and the output callback.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    underruns: AtomicU64,
    frames_rendered: AtomicU64,
    blocks_produced: AtomicU64,
    shape_mismatches: AtomicU64,
    tap_dropped: AtomicU64,
    backpressure_retries: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub underruns: u64,
    pub frames_rendered: u64,
    pub blocks_produced: u64,
    pub shape_mismatches: u64,
    pub tap_dropped: u64,
    pub backpressure_retries: u64,
    pub stale_discarded: u64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_underrun(&self) -> u64 {
        self.underruns.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_frames(&self, frames: u64) {
        self.frames_rendered.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.blocks_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shape_mismatch(&self) {
        self.shape_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tap_drop(&self) {
        self.tap_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Snapshot all counters. `stale_discarded` comes from the block queue.
    pub fn snapshot(&self, stale_discarded: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            underruns: self.underruns(),
            frames_rendered: self.frames_rendered(),
            blocks_produced: self.blocks_produced.load(Ordering::Relaxed),
            shape_mismatches: self.shape_mismatches.load(Ordering::Relaxed),
            tap_dropped: self.tap_dropped.load(Ordering::Relaxed),
            backpressure_retries: self.backpressure_retries.load(Ordering::Relaxed),
            stale_discarded,
        }
    }
}
