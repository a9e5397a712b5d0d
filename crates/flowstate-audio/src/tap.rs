//! Best-effort copies of processed audio for visualizers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use flowstate_core::AudioBlock;

use crate::metrics::EngineMetrics;

/// Producer side of the tap. Never blocks.
#[derive(Clone)]
pub struct VisualizationTap {
    tx: Sender<AudioBlock>,
    metrics: Arc<EngineMetrics>,
    /// Cleared the first time an offer finds the receiver gone.
    connected: Arc<AtomicBool>,
}

/// Consumer side of the tap.
pub struct TapReceiver {
    rx: Receiver<AudioBlock>,
    history: VecDeque<f32>,
}

/// Create a connected tap with room for `capacity` blocks.
pub fn visualization_tap(capacity: usize, metrics: Arc<EngineMetrics>) -> (VisualizationTap, TapReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        VisualizationTap {
            tx,
            metrics,
            connected: Arc::new(AtomicBool::new(true)),
        },
        TapReceiver {
            rx,
            history: VecDeque::new(),
        },
    )
}

impl VisualizationTap {
    /// Offer a copy of `block`. Dropped if the consumer is slow or gone.
    pub fn offer(&self, block: &AudioBlock) {
        if !self.is_connected() {
            return;
        }
        match self.tx.try_send(block.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.metrics.record_tap_drop(),
            Err(TrySendError::Disconnected(_)) => self.connected.store(false, Ordering::Relaxed),
        }
    }

    /// Whether the receiver was still attached at the last offer.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl TapReceiver {
    /// Next block if one is waiting.
    pub fn try_recv(&self) -> Option<AudioBlock> {
        match self.rx.try_recv() {
            Ok(block) => Some(block),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain waiting blocks and return the most recent `n` mono samples.
    ///
    /// Fewer than `n` samples are returned until enough audio has arrived.
    pub fn latest_mono(&mut self, n: usize) -> Vec<f32> {
        while let Some(block) = self.try_recv() {
            let channels = block.channels().max(1) as usize;
            self.history.extend(
                block
                    .frames_iter()
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
        if self.history.len() > n {
            let excess = self.history.len() - n;
            self.history.drain(..excess);
        }
        self.history.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_core::StreamProperties;

    fn block(value: f32) -> AudioBlock {
        AudioBlock::from_interleaved(vec![value, -value, value, -value], StreamProperties::default())
    }

    #[test]
    fn test_slow_consumer_drops_copies() {
        let metrics = EngineMetrics::new();
        let (tap, rx) = visualization_tap(2, metrics.clone());
        for _ in 0..5 {
            tap.offer(&block(0.5));
        }
        assert_eq!(metrics.snapshot(0).tap_dropped, 3);
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn test_disconnected_consumer_is_harmless() {
        let metrics = EngineMetrics::new();
        let (tap, rx) = visualization_tap(2, metrics.clone());
        assert!(tap.is_connected());
        drop(rx);
        tap.offer(&block(0.1));
        assert!(!tap.is_connected());
        // Later offers are skipped without counting drops
        tap.offer(&block(0.1));
        assert_eq!(metrics.snapshot(0).tap_dropped, 0);
    }

    #[test]
    fn test_latest_mono_keeps_tail() {
        let metrics = EngineMetrics::new();
        let (tap, mut rx) = visualization_tap(4, metrics);
        let a = AudioBlock::from_interleaved(vec![1.0, 0.0, 0.5, 0.5], StreamProperties::default());
        let b = AudioBlock::from_interleaved(vec![0.2, 0.2, 0.0, 0.4], StreamProperties::default());
        tap.offer(&a);
        tap.offer(&b);
        assert_eq!(rx.latest_mono(3), vec![0.5, 0.2, 0.2]);
    }
}
