//! Stream property types shared by the decoder, effects and output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Sample rate and channel layout of a decoded stream.
///
/// Every effect and the output sink is reconfigured whenever this changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StreamProperties {
    /// Frames per second.
    pub sample_rate: u32,
    /// Samples per frame.
    pub channels: u16,
}

impl StreamProperties {
    /// Create stream properties, rejecting zero rates or channel counts.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidArgument("sample rate must be positive".into()));
        }
        if channels == 0 {
            return Err(Error::InvalidArgument("channel count must be positive".into()));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Number of channels as a `usize` for indexing.
    pub const fn channel_count(&self) -> usize {
        self.channels as usize
    }

    /// Duration of `frames` frames in seconds.
    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / f64::from(self.sample_rate)
    }

    /// Number of whole frames in `secs` seconds.
    pub fn secs_to_frames(&self, secs: f64) -> u64 {
        (secs.max(0.0) * f64::from(self.sample_rate)) as u64
    }

    /// Period of one block of `block_size` frames in seconds.
    pub fn block_period_secs(&self, block_size: usize) -> f64 {
        block_size as f64 / f64::from(self.sample_rate)
    }
}

impl Default for StreamProperties {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl fmt::Display for StreamProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz, {} ch", self.sample_rate, self.channels)
    }
}
