//! # flowstate-audio
//!
//! Real-time playback engine for Flow State.
//!
//! Features:
//! - Producer thread decoding fixed-size blocks with symphonia
//! - Parameter-driven effects chain with per-effect state
//! - Bounded, epoch-tagged block queue between producer and output
//! - Low-latency cpal output with underrun-safe rendering

pub mod buffer;
pub mod chain;
pub mod channels;
pub mod config;
pub mod control;
pub mod decode;
pub mod effects;
pub mod engine;
pub mod host;
pub mod metrics;
pub mod output;
pub mod producer;
pub mod tap;
pub mod worker;

pub use chain::{EffectId, EffectsChain, SharedChain};
pub use config::EngineConfig;
pub use engine::{EngineEvent, PlaybackController, PlaybackState, SyncTarget};
pub use host::{ActionOutcome, Host, PlaybackAction};
pub use metrics::MetricsSnapshot;
pub use output::{CpalDevice, ManualDevice, NullDevice, OutputDevice};
pub use tap::TapReceiver;
