//! Engine tuning knobs.

use std::time::Duration;

use flowstate_core::{Error, Result, StreamProperties};
use serde::{Deserialize, Serialize};

/// Playback engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames per processing block.
    pub block_size: usize,
    /// Maximum number of processed blocks waiting for the output.
    pub queue_capacity: usize,
    /// How long the producer waits on a full queue before retrying.
    pub push_timeout_ms: u64,
    /// Upper bound on joining the producer during stop.
    pub stop_timeout_ms: u64,
    /// Blocks buffered for the visualization tap before copies are dropped.
    pub tap_capacity: usize,
    /// `previous()` restarts the current track past this position.
    pub restart_threshold_secs: f64,
    /// Volume applied before any session is restored.
    pub initial_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            queue_capacity: 15,
            push_timeout_ms: 100,
            stop_timeout_ms: 2000,
            tap_capacity: 4,
            restart_threshold_secs: 3.0,
            initial_volume: 0.7,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(Error::Config("initial_volume must be within 0.0..=1.0".into()));
        }
        Ok(())
    }

    pub const fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Half a block period, never below one millisecond.
    pub fn pop_timeout(&self, props: StreamProperties) -> Duration {
        let half_period = props.block_period_secs(self.block_size) * 0.5;
        Duration::from_secs_f64(half_period).max(Duration::from_millis(1))
    }
}
