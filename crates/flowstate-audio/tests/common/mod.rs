//! Shared fixtures for the playback scenario tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use flowstate_audio::{EffectsChain, EngineConfig, EngineEvent, ManualDevice, PlaybackController};
use flowstate_core::StreamProperties;

pub const BLOCK: usize = 128;

/// Write a float WAV whose sample at frame `f` is `offset + f * 1e-4` on every channel.
pub fn write_ramp(path: &Path, sample_rate: u32, channels: u16, frames: usize, offset: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for frame in 0..frames {
        for _ in 0..channels {
            writer.write_sample(offset + frame as f32 * 1e-4).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Temporary directory with a set of short mono tracks.
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// A mono 8 kHz ramp of `frames` frames.
    pub fn track(&self, name: &str, frames: usize) -> PathBuf {
        self.track_with(name, 8000, 1, frames)
    }

    pub fn track_with(&self, name: &str, sample_rate: u32, channels: u16, frames: usize) -> PathBuf {
        let path = self.dir.path().join(format!("{name}.wav"));
        write_ramp(&path, sample_rate, channels, frames, 0.01);
        path
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        block_size: BLOCK,
        initial_volume: 1.0,
        ..EngineConfig::default()
    }
}

/// Controller wired to a manual device with an empty effects chain.
pub fn controller() -> (PlaybackController, ManualDevice, Receiver<EngineEvent>) {
    let device = ManualDevice::new();
    let controller = PlaybackController::new(
        config(),
        Box::new(device.clone()),
        EffectsChain::new(StreamProperties::default()),
    )
    .unwrap();
    let events = controller.events();
    (controller, device, events)
}

/// Render, poll and collect events until `done` holds or the deadline passes.
pub fn pump<F>(
    controller: &mut PlaybackController,
    device: &ManualDevice,
    events: &Receiver<EngineEvent>,
    seen: &mut Vec<EngineEvent>,
    mut done: F,
) -> bool
where
    F: FnMut(&PlaybackController, &[EngineEvent]) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        device.render(BLOCK);
        controller.poll();
        seen.extend(events.try_iter());
        if done(controller, seen) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

pub fn track_changes(events: &[EngineEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TrackChanged(i) => Some(*i),
            _ => None,
        })
        .collect()
}
