//! Multi-voice chorus.

use std::f32::consts::TAU;

use flowstate_core::{AudioBlock, Result};

use super::{Effect, EffectBase, ParamInfo};

/// Longest modulated delay any voice can reach, in seconds.
const MAX_DELAY_SECS: f32 = 0.025;
/// Centre delay of the first voice.
const BASE_DELAY_SECS: f32 = 0.007;
/// Additional centre delay per voice.
const VOICE_STEP_SECS: f32 = 0.002;

#[derive(Debug, Clone, Copy)]
struct Voice {
    centre_secs: f32,
    phase_offset: f32,
}

/// Modulated delay voices summed against the dry signal.
pub struct Chorus {
    base: EffectBase,
    voices: Vec<Voice>,
    /// Per-channel ring buffers.
    lines: Vec<Vec<f32>>,
    write_index: usize,
    lfo_phase: f32,
    lfo_increment: f32,
}

impl Chorus {
    pub fn new() -> Self {
        let base = EffectBase::new(
            "Chorus",
            vec![
                ParamInfo::new("rate_hz", 0.2)
                    .with_range(0.01, 5.0)
                    .with_unit("Hz"),
                ParamInfo::new("depth_ms", 3.0)
                    .with_range(0.0, 10.0)
                    .with_unit("ms"),
                ParamInfo::new("mix", 0.5).with_range(0.0, 1.0),
                ParamInfo::new("voices", 3.0).with_range(1.0, 6.0).stepped(),
                ParamInfo::new("spread", 0.7).with_range(0.0, 1.0),
            ],
        );
        let mut chorus = Self {
            base,
            voices: Vec::new(),
            lines: Vec::new(),
            write_index: 0,
            lfo_phase: 0.0,
            lfo_increment: 0.0,
        };
        chorus.configure();
        chorus
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    fn line_len(&self) -> usize {
        (MAX_DELAY_SECS * self.base.sample_rate()).ceil() as usize + 2
    }

    #[inline]
    fn read_fractional(line: &[f32], write_index: usize, delay: f32) -> f32 {
        let len = line.len();
        let delay = delay.clamp(1.0, (len - 2) as f32);
        let whole = delay.floor();
        let frac = delay - whole;
        let i0 = (write_index + len - whole as usize) % len;
        let i1 = (i0 + len - 1) % len;
        line[i0] * (1.0 - frac) + line[i1] * frac
    }
}

impl Default for Chorus {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Chorus {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn configure(&mut self) {
        let count = self.base.param("voices") as usize;
        self.voices = (0..count)
            .map(|i| Voice {
                centre_secs: (i as f32).mul_add(VOICE_STEP_SECS, BASE_DELAY_SECS),
                phase_offset: TAU * i as f32 / count as f32,
            })
            .collect();
        self.lfo_increment = TAU * self.base.param("rate_hz") / self.base.sample_rate();

        let len = self.line_len();
        let channels = self.base.channels();
        if self.lines.len() != channels || self.lines.first().map(Vec::len) != Some(len) {
            self.lines = vec![vec![0.0; len]; channels];
            self.write_index = 0;
        }
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let channels = self.base.channels();
        let sample_rate = self.base.sample_rate();
        let depth = self.base.param("depth_ms") * 0.001;
        let mix = self.base.param("mix");
        let spread = self.base.param("spread");
        let max_delay = (MAX_DELAY_SECS - 1.0 / sample_rate).max(0.0);
        let gain = 1.0 / self.voices.len().max(1) as f32;
        let len = self.lines.first().map_or(0, Vec::len);
        if len < 3 {
            return Ok(());
        }

        for frame in block.samples_mut().chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let line = &mut self.lines[ch];
                line[self.write_index] = *sample;
                let channel_offset = spread * std::f32::consts::PI * ch as f32;
                let wet = self
                    .voices
                    .iter()
                    .map(|voice| {
                        let lfo = (self.lfo_phase + voice.phase_offset + channel_offset).sin();
                        let delay_secs = lfo.mul_add(depth, voice.centre_secs).clamp(0.0, max_delay);
                        Self::read_fractional(line, self.write_index, delay_secs * sample_rate)
                    })
                    .sum::<f32>()
                    * gain;
                *sample = *sample * (1.0 - mix) + wet * mix;
            }
            self.write_index = (self.write_index + 1) % len;
            self.lfo_phase = (self.lfo_phase + self.lfo_increment) % TAU;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.lines.iter_mut().for_each(|line| line.fill(0.0));
        self.write_index = 0;
        self.lfo_phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_core::StreamProperties;

    #[test]
    fn test_voice_count_follows_parameter() {
        let mut chorus = Chorus::new();
        assert_eq!(chorus.voice_count(), 3);
        chorus.set_parameter("voices", 5.0);
        assert_eq!(chorus.voice_count(), 5);
    }

    #[test]
    fn test_output_is_deterministic_after_reset() {
        let input: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.03).sin() * 0.5).collect();
        let mut chorus = Chorus::new();

        let mut first = AudioBlock::from_interleaved(input.clone(), StreamProperties::default());
        chorus.process(&mut first).unwrap();
        chorus.reset();
        let mut second = AudioBlock::from_interleaved(input, StreamProperties::default());
        chorus.process(&mut second).unwrap();

        assert_eq!(first.samples(), second.samples());
        assert!(first.is_finite());
    }

    #[test]
    fn test_dry_only_when_mix_zero() {
        let mut chorus = Chorus::new();
        chorus.set_parameter("mix", 0.0);
        let input = vec![0.25; 256];
        let mut block = AudioBlock::from_interleaved(input.clone(), StreamProperties::default());
        chorus.process(&mut block).unwrap();
        assert_eq!(block.samples(), input.as_slice());
    }
}
