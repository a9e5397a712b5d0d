//! Block buffering between the producer and the real-time output.

pub mod queue;

pub use queue::{shared_block_queue, BlockQueue, QueueFull, SharedBlockQueue};
