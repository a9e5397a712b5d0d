//! Bounded block queue between the producer thread and the output callback.
//!
//! Each queued block is tagged with the queue epoch that was current when it
//! was decoded. `clear()` bumps the epoch, so anything produced before a
//! seek or stop is discarded on the consumer side even if the producer
//! manages to push it after the clear.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use flowstate_core::AudioBlock;
use thiserror::Error;
use tracing::trace;

/// Returned by [`BlockQueue::push`] when the queue stayed full for the whole timeout.
///
/// Carries the block back so the producer can retry without re-decoding.
#[derive(Debug, Error)]
#[error("block queue full")]
pub struct QueueFull(pub AudioBlock);

struct Tagged {
    epoch: u64,
    block: AudioBlock,
}

/// Bounded, thread-safe hand-off of processed blocks.
pub struct BlockQueue {
    tx: Sender<Tagged>,
    rx: Receiver<Tagged>,
    epoch: AtomicU64,
    /// Blocks thrown away because a clear happened after they were decoded.
    stale_discarded: AtomicU64,
    capacity: usize,
}

impl BlockQueue {
    /// Create a queue holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            epoch: AtomicU64::new(0),
            stale_discarded: AtomicU64::new(0),
            capacity,
        }
    }

    /// Get the queue capacity in blocks.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of blocks currently queued (stale ones included).
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    /// The current epoch. Producers tag blocks with the value read before decoding.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Total stale blocks discarded so far.
    pub fn stale_discarded(&self) -> u64 {
        self.stale_discarded.load(Ordering::Relaxed)
    }

    /// Push a block, waiting up to `timeout` for space.
    ///
    /// Blocks tagged with an outdated epoch are accepted and silently dropped.
    pub fn push(&self, block: AudioBlock, epoch: u64, timeout: Duration) -> Result<(), QueueFull> {
        if epoch < self.epoch() {
            self.stale_discarded.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self.tx.send_timeout(Tagged { epoch, block }, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(tagged) | SendTimeoutError::Disconnected(tagged)) => {
                trace!("Block queue full after {timeout:?}");
                Err(QueueFull(tagged.block))
            }
        }
    }

    /// Pop the next current-epoch block, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout; the caller treats that as an underrun.
    pub fn pop(&self, timeout: Duration) -> Option<AudioBlock> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(tagged) => {
                    if tagged.epoch >= self.epoch() {
                        return Some(tagged.block);
                    }
                    self.stale_discarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<AudioBlock> {
        self.pop(Duration::ZERO)
    }

    /// Invalidate everything queued so far and drain it.
    ///
    /// Returns the new epoch.
    pub fn clear(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let mut drained = 0u64;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            self.stale_discarded.fetch_add(drained, Ordering::Relaxed);
            trace!("Cleared {drained} queued blocks (epoch {epoch})");
        }
        epoch
    }
}

/// Thread-safe reference to a block queue.
pub type SharedBlockQueue = Arc<BlockQueue>;

/// Create a new shared block queue.
pub fn shared_block_queue(capacity: usize) -> SharedBlockQueue {
    Arc::new(BlockQueue::new(capacity))
}
