//! Realtime output: the block renderer and the devices that drive it.
//!
//! The renderer runs inside the device callback. It only touches atomics and
//! the block queue, and it waits at most one pop timeout per callback.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig,
};
use flowstate_core::{AudioBlock, Error, Result, StreamProperties};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::SharedBlockQueue;
use crate::metrics::EngineMetrics;

/// Values the callback reads without locking.
#[derive(Debug)]
pub struct SinkShared {
    volume: AtomicU32,
    muted: AtomicBool,
    /// Underruns are only counted while playback is expected.
    active: AtomicBool,
    played_frame: AtomicU64,
    device_lost: AtomicBool,
}

impl SinkShared {
    pub fn new(volume: f32) -> Arc<Self> {
        Arc::new(Self {
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(false),
            active: AtomicBool::new(false),
            played_frame: AtomicU64::new(0),
            device_lost: AtomicBool::new(false),
        })
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Store a volume clamped to `0.0..=1.0`. Mute state is untouched.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Volume after mute: 0 when muted, otherwise the stored volume.
    pub fn effective_volume(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            self.volume()
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Frame index of the last sample written to the device.
    pub fn played_frame(&self) -> u64 {
        self.played_frame.load(Ordering::Relaxed)
    }

    pub fn set_played_frame(&self, frame: u64) {
        self.played_frame.store(frame, Ordering::Relaxed);
    }

    pub fn mark_device_lost(&self) {
        self.device_lost.store(true, Ordering::Relaxed);
    }

    /// Returns and clears the device-lost flag.
    pub fn take_device_lost(&self) -> bool {
        self.device_lost.swap(false, Ordering::Relaxed)
    }
}

/// Callback core: fills device buffers from the block queue.
pub struct BlockRenderer {
    queue: SharedBlockQueue,
    shared: Arc<SinkShared>,
    metrics: Arc<EngineMetrics>,
    properties: StreamProperties,
    block_size: usize,
    pop_timeout: Duration,
    /// Partially written block and the next sample offset into it.
    carry: Option<(AudioBlock, usize)>,
    epoch: u64,
}

impl BlockRenderer {
    pub fn new(
        queue: SharedBlockQueue,
        shared: Arc<SinkShared>,
        metrics: Arc<EngineMetrics>,
        properties: StreamProperties,
        block_size: usize,
        pop_timeout: Duration,
    ) -> Self {
        let epoch = queue.epoch();
        Self {
            queue,
            shared,
            metrics,
            properties,
            block_size,
            pop_timeout,
            carry: None,
            epoch,
        }
    }

    pub const fn properties(&self) -> StreamProperties {
        self.properties
    }

    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn shared(&self) -> Arc<SinkShared> {
        self.shared.clone()
    }

    /// Fill `out` (interleaved, configured channel count) with audio or silence.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.properties.channel_count();
        let volume = self.shared.effective_volume();
        let mut written = 0;

        while written < out.len() {
            self.drop_stale_carry();
            if self.carry.is_none() {
                match self.queue.pop(self.pop_timeout) {
                    Some(block) if block.has_shape(self.block_size, self.properties.channels)
                        && block.sample_rate() == self.properties.sample_rate =>
                    {
                        self.carry = Some((block, 0));
                    }
                    Some(block) => {
                        self.metrics.record_shape_mismatch();
                        warn!(
                            "Dropping block of {} frames ({}), expected {} frames ({})",
                            block.frames(),
                            block.properties(),
                            self.block_size,
                            self.properties
                        );
                        let n = (self.block_size * channels).min(out.len() - written);
                        out[written..written + n].fill(0.0);
                        written += n;
                        continue;
                    }
                    None => {
                        if self.shared.is_active() {
                            let count = self.metrics.record_underrun();
                            debug!("Output underrun #{count}");
                        }
                        out[written..].fill(0.0);
                        break;
                    }
                }
            }

            let Some((block, offset)) = self.carry.as_mut() else {
                continue;
            };
            let samples = block.samples();
            let n = (samples.len() - *offset).min(out.len() - written);
            for (dst, src) in out[written..written + n]
                .iter_mut()
                .zip(&samples[*offset..*offset + n])
            {
                *dst = src * volume;
            }
            written += n;
            *offset += n;
            let frame = block.start_frame() + (*offset / channels) as u64;
            self.shared.set_played_frame(frame);
            if *offset >= samples.len() {
                self.carry = None;
            }
        }

        self.metrics.record_frames((out.len() / channels.max(1)) as u64);
    }

    fn drop_stale_carry(&mut self) {
        let epoch = self.queue.epoch();
        if epoch != self.epoch {
            self.epoch = epoch;
            self.carry = None;
        }
    }
}

/// A sink the renderer can be attached to.
///
/// Not `Send`: platform streams are pinned to the thread that built them.
pub trait OutputDevice {
    /// Start calling `renderer` at the renderer's stream properties.
    fn open(&mut self, renderer: BlockRenderer) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn name(&self) -> String;
}

/// Hardware output through cpal.
pub struct CpalDevice {
    /// Requested device; `None` uses the host default.
    device_name: Option<String>,
    stream: Option<Stream>,
    active_name: String,
}

impl CpalDevice {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
            active_name: String::new(),
        }
    }

    fn find_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Device("No output device found".to_string())),
            Some(wanted) => host
                .output_devices()
                .map_err(|e| Error::Device(format!("Failed to list devices: {e}")))?
                .find(|d| d.name().is_ok_and(|n| &n == wanted))
                .ok_or_else(|| Error::Device(format!("Output device '{wanted}' not found"))),
        }
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        mut renderer: BlockRenderer,
    ) -> Result<Stream> {
        let shared = renderer.shared();
        let err_fn = move |err| {
            error!("Audio stream error: {err}");
            shared.mark_device_lost();
        };
        let mut scratch: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let buf = &mut scratch[..data.len()];
                    renderer.render(buf);
                    for (dst, src) in data.iter_mut().zip(buf.iter()) {
                        *dst = T::from_sample(*src);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::Device(format!("Failed to build stream: {e}")))
    }
}

impl OutputDevice for CpalDevice {
    fn open(&mut self, renderer: BlockRenderer) -> Result<()> {
        self.close();
        let device = self.find_device()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let props = renderer.properties();

        let sample_format = device
            .default_output_config()
            .map_err(|e| Error::Device(format!("Failed to get output config: {e}")))?
            .sample_format();
        let config = StreamConfig {
            channels: props.channels,
            sample_rate: SampleRate(props.sample_rate),
            buffer_size: BufferSize::Default,
        };
        debug!("Opening {name} at {props} ({sample_format:?})");

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, renderer)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, renderer)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, renderer)?,
            _ => {
                return Err(Error::Device(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };
        stream
            .play()
            .map_err(|e| Error::Device(format!("Failed to start stream: {e}")))?;

        info!("Using audio output device: {name}");
        self.active_name = name;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed output stream on {}", self.active_name);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> String {
        if self.active_name.is_empty() {
            self.device_name.clone().unwrap_or_else(|| "default".to_string())
        } else {
            self.active_name.clone()
        }
    }
}

/// Discards audio on a timer thread paced at the block period.
#[derive(Default)]
pub struct NullDevice {
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputDevice for NullDevice {
    fn open(&mut self, mut renderer: BlockRenderer) -> Result<()> {
        self.close();
        let props = renderer.properties();
        let period = Duration::from_secs_f64(props.block_period_secs(renderer.block_size()));
        let mut buf = vec![0.0f32; renderer.block_size() * props.channel_count()];
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("flowstate-null-output".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while flag.load(Ordering::Relaxed) {
                    renderer.render(&mut buf);
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| Error::Device(format!("Failed to start null output: {e}")))?;
        self.running = Some((running, handle));
        Ok(())
    }

    fn close(&mut self) {
        if let Some((flag, handle)) = self.running.take() {
            flag.store(false, Ordering::Relaxed);
            if handle.join().is_err() {
                error!("Null output thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }

    fn name(&self) -> String {
        "null".to_string()
    }
}

impl Drop for NullDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Device driven explicitly by the caller, one buffer at a time.
///
/// Cloning shares the same slot, so a test can keep a handle while the
/// controller owns the device.
#[derive(Clone, Default)]
pub struct ManualDevice {
    renderer: Arc<Mutex<Option<BlockRenderer>>>,
    fail_open: Arc<AtomicBool>,
}

impl ManualDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `open` calls fail with a device error.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Relaxed);
    }

    /// Render `frames` frames, or `None` while closed.
    pub fn render(&self, frames: usize) -> Option<AudioBlock> {
        let mut slot = self.renderer.lock();
        let renderer = slot.as_mut()?;
        let props = renderer.properties();
        let mut buf = vec![0.0; frames * props.channel_count()];
        renderer.render(&mut buf);
        Some(AudioBlock::from_interleaved(buf, props))
    }

    /// Simulate the device disappearing mid-stream.
    pub fn lose_device(&self) {
        if let Some(renderer) = self.renderer.lock().take() {
            renderer.shared().mark_device_lost();
        }
    }
}

impl OutputDevice for ManualDevice {
    fn open(&mut self, renderer: BlockRenderer) -> Result<()> {
        if self.fail_open.load(Ordering::Relaxed) {
            return Err(Error::Device("manual device unavailable".to_string()));
        }
        *self.renderer.lock() = Some(renderer);
        Ok(())
    }

    fn close(&mut self) {
        self.renderer.lock().take();
    }

    fn is_open(&self) -> bool {
        self.renderer.lock().is_some()
    }

    fn name(&self) -> String {
        "manual".to_string()
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::Device(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}
