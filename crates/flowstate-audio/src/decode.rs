//! Block-oriented audio file decoding using symphonia.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use flowstate_core::{AudioBlock, Error, Result, StreamProperties};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::{Error as SymphoniaError, SeekErrorKind},
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::{Time, TimeBase},
};
use tracing::{debug, error, trace, warn};

use crate::channels::adapt_interleaved;

/// Outcome of reading one block.
#[derive(Debug)]
pub enum BlockRead {
    /// A full block; the last one of a stream is zero-padded.
    Block(AudioBlock),
    /// No frames remain. Returned for every read after exhaustion.
    EndOfStream,
}

impl BlockRead {
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Incremental decoder for one open audio file.
pub struct StreamDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    properties: StreamProperties,
    duration_frames: Option<u64>,
    /// Decoded interleaved samples not yet handed out.
    pending: VecDeque<f32>,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Samples to drop after an accurate seek landed before the target.
    skip_samples: usize,
    /// Stream position of the next frame handed out.
    position_frames: u64,
    /// The container has no more packets.
    source_done: bool,
    /// Every frame has been handed out.
    exhausted: bool,
}

impl StreamDecoder {
    /// Open a file and probe its stream properties.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Open(format!("{}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Open(format!("{}: unsupported format: {e}", path.display())))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Open(format!("{}: no audio tracks found", path.display())))?;

        let track_id = track.id;
        let time_base = track.codec_params.time_base;
        let duration_frames = track.codec_params.n_frames;
        let sample_rate = track.codec_params.sample_rate;
        let channels = track.codec_params.channels.map(|c| c.count() as u16);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Open(format!("{}: no decoder: {e}", path.display())))?;

        let mut stream = Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            time_base,
            properties: StreamProperties::default(),
            duration_frames,
            pending: VecDeque::new(),
            sample_buf: None,
            skip_samples: 0,
            position_frames: 0,
            source_done: false,
            exhausted: false,
        };

        stream.properties = match (sample_rate, channels) {
            (Some(rate), Some(ch)) => StreamProperties::new(rate, ch)?,
            // Some containers only reveal the layout once a packet is decoded
            _ => stream.prime_properties(sample_rate)?,
        };

        debug!(
            "Opened {}: track={}, {}, duration={:?}",
            stream.path.display(),
            track_id,
            stream.properties,
            stream.duration_secs()
        );

        Ok(stream)
    }

    /// Sample rate and channel count of the decoded stream.
    pub const fn properties(&self) -> StreamProperties {
        self.properties
    }

    /// Path this decoder was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total duration in seconds, if the container reports it.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_frames
            .map(|frames| self.properties.frames_to_secs(frames))
    }

    /// Stream position of the next frame to be read.
    pub const fn position_frames(&self) -> u64 {
        self.position_frames
    }

    pub fn position_secs(&self) -> f64 {
        self.properties.frames_to_secs(self.position_frames)
    }

    /// Whether end of stream has been reached.
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Read exactly `frames` frames, zero-padding the final block.
    ///
    /// A decode failure mid-stream is returned once; the stream counts as
    /// exhausted afterwards.
    pub fn read_block(&mut self, frames: usize) -> Result<BlockRead> {
        if self.exhausted || frames == 0 {
            return Ok(BlockRead::EndOfStream);
        }

        let channels = self.properties.channel_count();
        let wanted = frames * channels;

        while self.pending.len() < wanted && !self.source_done {
            if let Err(e) = self.decode_packet() {
                self.exhausted = true;
                self.pending.clear();
                return Err(e);
            }
        }

        if self.pending.is_empty() {
            self.exhausted = true;
            debug!("End of stream: {}", self.path.display());
            return Ok(BlockRead::EndOfStream);
        }

        let available = self.pending.len().min(wanted);
        let mut samples: Vec<f32> = self.pending.drain(..available).collect();
        samples.resize(wanted, 0.0);

        let block = AudioBlock::from_interleaved(samples, self.properties)
            .with_start_frame(self.position_frames);
        self.position_frames += (available / channels) as u64;

        trace!("Read block at frame {}", block.start_frame());
        Ok(BlockRead::Block(block))
    }

    /// Seek to `position_secs`.
    ///
    /// Positions past the end clamp to end of stream.
    pub fn seek(&mut self, position_secs: f64) -> Result<()> {
        if !position_secs.is_finite() || position_secs < 0.0 {
            return Err(Error::Seek(format!("invalid position {position_secs}")));
        }

        let target_frames = self.properties.secs_to_frames(position_secs);
        self.pending.clear();
        self.skip_samples = 0;

        if let Some(total) = self.duration_frames {
            if target_frames >= total {
                debug!("Seek to {position_secs:.2}s is past the end, clamping");
                self.mark_exhausted_at(total);
                return Ok(());
            }
        }

        let seeked = match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::from(position_secs),
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => seeked,
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                // Duration unknown up front; the container knows better
                debug!("Seek to {position_secs:.2}s is out of range, clamping");
                self.mark_exhausted_at(target_frames);
                return Ok(());
            }
            Err(e) => return Err(Error::Seek(format!("{}: {e}", self.path.display()))),
        };

        // Reset decoder state
        self.decoder.reset();

        let required = self.ts_to_frames(seeked.required_ts);
        let actual = self.ts_to_frames(seeked.actual_ts);
        self.skip_samples = required.saturating_sub(actual) as usize * self.properties.channel_count();
        self.position_frames = required;
        self.source_done = false;
        self.exhausted = false;

        debug!("Seeked to frame {required} (landed at {actual})");
        Ok(())
    }

    fn mark_exhausted_at(&mut self, frame: u64) {
        self.position_frames = frame;
        self.source_done = true;
        self.exhausted = true;
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                let rate = f64::from(self.properties.sample_rate);
                time.seconds * u64::from(self.properties.sample_rate)
                    + (time.frac * rate).round() as u64
            }
            None => ts,
        }
    }

    fn prime_properties(&mut self, sample_rate: Option<u32>) -> Result<StreamProperties> {
        let spec = loop {
            let packet = self
                .format
                .next_packet()
                .map_err(|e| Error::Open(format!("{}: empty stream: {e}", self.path.display())))?;
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let samples = copy_interleaved(&mut self.sample_buf, decoded);
                    self.pending.extend(samples.iter().copied());
                    break spec;
                }
                Err(SymphoniaError::DecodeError(e)) => warn!("Skipping corrupt packet: {e}"),
                Err(e) => return Err(Error::Open(format!("{}: {e}", self.path.display()))),
            }
        };

        StreamProperties::new(sample_rate.unwrap_or(spec.rate), spec.channels.count() as u16)
    }

    fn decode_packet(&mut self) -> Result<()> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.source_done = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Stream reset required, treating as end of stream");
                    self.source_done = true;
                    return Ok(());
                }
                Err(e) => {
                    error!("Failed to read packet: {e}");
                    return Err(Error::Decode(format!("failed to read packet: {e}")));
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let decoded_channels = decoded.spec().channels.count() as u16;
                    let samples = copy_interleaved(&mut self.sample_buf, decoded);

                    let skip = self.skip_samples.min(samples.len());
                    self.skip_samples -= skip;
                    let samples = &samples[skip..];

                    if decoded_channels == self.properties.channels {
                        self.pending.extend(samples.iter().copied());
                    } else {
                        warn!(
                            "Packet has {decoded_channels} channels, stream has {}",
                            self.properties.channels
                        );
                        let adapted =
                            adapt_interleaved(samples, decoded_channels, self.properties.channels);
                        self.pending.extend(adapted);
                    }
                    return Ok(());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Log and skip corrupt frames
                    warn!("Decode error (skipping packet): {e}");
                }
                Err(e) => {
                    return Err(Error::Decode(format!("decode failed: {e}")));
                }
            }
        }
    }
}

/// Copy a decoded buffer into the reusable interleaved sample buffer.
fn copy_interleaved<'a>(
    slot: &'a mut Option<SampleBuffer<f32>>,
    decoded: symphonia::core::audio::AudioBufferRef<'_>,
) -> &'a [f32] {
    let spec = *decoded.spec();
    let capacity = decoded.capacity() as u64;

    let needs_new = slot
        .as_ref()
        .map_or(true, |buf| buf.capacity() < decoded.capacity() * spec.channels.count());
    if needs_new {
        *slot = Some(SampleBuffer::new(capacity, spec));
    }

    match slot {
        Some(buf) => {
            buf.copy_interleaved_ref(decoded);
            buf.samples()
        }
        None => &[],
    }
}
