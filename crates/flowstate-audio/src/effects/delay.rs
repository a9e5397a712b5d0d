//! Feedback delay (echo).

use flowstate_core::{AudioBlock, Result};

use super::{Effect, EffectBase, ParamInfo};

const MAX_DELAY_MS: f32 = 2000.0;

/// Circular buffer of interleaved frames.
#[derive(Debug, Clone, Default)]
struct DelayLine {
    buffer: Vec<f32>,
    channels: usize,
    write_frame: usize,
}

impl DelayLine {
    fn allocate(&mut self, frames: usize, channels: usize) {
        let len = frames.max(1) * channels;
        if self.buffer.len() != len || self.channels != channels {
            self.buffer = vec![0.0; len];
            self.channels = channels;
            self.write_frame = 0;
        }
    }

    fn capacity_frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.buffer.len() / self.channels
        }
    }

    #[inline]
    fn read(&self, delay_frames: usize, channel: usize) -> f32 {
        let capacity = self.capacity_frames();
        let frame = (self.write_frame + capacity - delay_frames) % capacity;
        self.buffer[frame * self.channels + channel]
    }

    #[inline]
    fn write(&mut self, channel: usize, value: f32) {
        self.buffer[self.write_frame * self.channels + channel] = value;
    }

    #[inline]
    fn advance(&mut self) {
        self.write_frame = (self.write_frame + 1) % self.capacity_frames();
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_frame = 0;
    }
}

/// Echo with damped feedback and dry/wet mix.
pub struct Delay {
    base: EffectBase,
    line: DelayLine,
    delay_frames: usize,
    /// One-pole lowpass memory in the feedback path, per channel.
    damp_state: Vec<f32>,
}

impl Delay {
    pub fn new() -> Self {
        let base = EffectBase::new(
            "Delay",
            vec![
                ParamInfo::new("time_ms", 350.0)
                    .with_range(1.0, MAX_DELAY_MS)
                    .with_unit("ms"),
                ParamInfo::new("feedback", 0.35).with_range(0.0, 0.95),
                ParamInfo::new("mix", 0.3).with_range(0.0, 1.0),
                ParamInfo::new("damping", 0.3).with_range(0.0, 1.0),
            ],
        );
        let mut delay = Self {
            base,
            line: DelayLine::default(),
            delay_frames: 1,
            damp_state: Vec::new(),
        };
        delay.configure();
        delay
    }

    /// Delay length in frames for the current sample rate.
    pub const fn delay_frames(&self) -> usize {
        self.delay_frames
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Delay {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn configure(&mut self) {
        let sample_rate = self.base.sample_rate();
        let channels = self.base.channels();
        let capacity = (MAX_DELAY_MS * 0.001 * sample_rate).ceil() as usize + 1;
        self.line.allocate(capacity, channels);
        let frames = (self.base.param("time_ms") * 0.001 * sample_rate).round() as usize;
        self.delay_frames = frames.clamp(1, capacity.saturating_sub(1).max(1));
        self.damp_state.resize(channels, 0.0);
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let channels = self.base.channels();
        let feedback = self.base.param("feedback");
        let mix = self.base.param("mix");
        let damping = self.base.param("damping");

        for frame in block.samples_mut().chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let dry = *sample;
                let wet = self.line.read(self.delay_frames, ch);
                let state = &mut self.damp_state[ch];
                *state = wet * (1.0 - damping) + *state * damping;
                self.line.write(ch, dry + *state * feedback);
                *sample = dry * (1.0 - mix) + wet * mix;
            }
            self.line.advance();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.line.clear();
        self.damp_state.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_core::StreamProperties;

    const MONO: StreamProperties = StreamProperties {
        sample_rate: 1000,
        channels: 1,
    };

    fn impulse(len: usize) -> AudioBlock {
        let mut samples = vec![0.0; len];
        samples[0] = 1.0;
        AudioBlock::from_interleaved(samples, MONO)
    }

    #[test]
    fn test_echo_appears_after_delay_time() {
        let mut delay = Delay::new();
        delay.set_stream_properties(MONO);
        delay.set_parameter("time_ms", 10.0);
        delay.set_parameter("mix", 1.0);
        delay.set_parameter("damping", 0.0);
        assert_eq!(delay.delay_frames(), 10);

        let mut block = impulse(32);
        delay.process(&mut block).unwrap();
        assert!(block.samples()[0].abs() < 1e-6);
        assert!((block.samples()[10] - 1.0).abs() < 1e-6);
        assert!((block.samples()[20] - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_changing_time_keeps_buffer() {
        let mut delay = Delay::new();
        delay.set_stream_properties(MONO);
        delay.set_parameter("mix", 1.0);
        delay.set_parameter("damping", 0.0);
        delay.set_parameter("time_ms", 20.0);
        let mut first = impulse(10);
        delay.process(&mut first).unwrap();

        // The impulse is already in the line; shortening the delay must not drop it
        delay.set_parameter("time_ms", 15.0);
        let mut second = AudioBlock::silence(10, MONO);
        delay.process(&mut second).unwrap();
        assert!((second.samples()[5] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_silences_tail() {
        let mut delay = Delay::new();
        delay.set_stream_properties(MONO);
        delay.set_parameter("time_ms", 5.0);
        let mut block = impulse(4);
        delay.process(&mut block).unwrap();
        delay.reset();
        let mut tail = AudioBlock::silence(16, MONO);
        delay.process(&mut tail).unwrap();
        assert!(tail.is_silent());
        assert_eq!(delay.get_parameter("time_ms"), Some(5.0));
    }
}
