//! Feed-forward peak compressor with optional lookahead.

use std::collections::VecDeque;

use flowstate_core::{AudioBlock, Result};

use super::{db_to_linear, linear_to_db, time_constant_coeff, Effect, EffectBase, ParamInfo};

const MAX_LOOKAHEAD_MS: f32 = 20.0;

/// Downward compressor. The detector is linked across channels so the
/// stereo image does not shift under gain reduction.
pub struct Compressor {
    base: EffectBase,
    attack_coeff: f32,
    release_coeff: f32,
    makeup: f32,
    lookahead_frames: usize,
    /// Smoothed gain reduction in dB (positive means attenuation).
    envelope_db: f32,
    /// Interleaved samples delayed by the lookahead.
    lookahead: VecDeque<f32>,
}

impl Compressor {
    pub fn new() -> Self {
        let base = EffectBase::new(
            "Compressor",
            vec![
                ParamInfo::new("threshold_db", -18.0)
                    .with_range(-60.0, 0.0)
                    .with_unit("dB"),
                ParamInfo::new("ratio", 4.0).with_range(1.0, 20.0),
                ParamInfo::new("attack_ms", 10.0)
                    .with_range(0.1, 200.0)
                    .with_unit("ms"),
                ParamInfo::new("release_ms", 100.0)
                    .with_range(5.0, 2000.0)
                    .with_unit("ms"),
                ParamInfo::new("makeup_db", 0.0)
                    .with_range(0.0, 24.0)
                    .with_unit("dB"),
                ParamInfo::new("lookahead_ms", 0.0)
                    .with_range(0.0, MAX_LOOKAHEAD_MS)
                    .with_unit("ms"),
            ],
        );
        let mut compressor = Self {
            base,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            makeup: 1.0,
            lookahead_frames: 0,
            envelope_db: 0.0,
            lookahead: VecDeque::new(),
        };
        compressor.configure();
        compressor.reset();
        compressor
    }

    /// Current smoothed gain reduction in dB.
    pub const fn gain_reduction_db(&self) -> f32 {
        self.envelope_db
    }

    fn static_reduction_db(&self, level_db: f32) -> f32 {
        let threshold = self.base.param("threshold_db");
        let ratio = self.base.param("ratio");
        let over = level_db - threshold;
        if over <= 0.0 {
            0.0
        } else {
            over * (1.0 - 1.0 / ratio)
        }
    }

    fn fill_lookahead(&mut self) {
        let wanted = self.lookahead_frames * self.base.channels();
        self.lookahead.resize(wanted, 0.0);
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Compressor {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn configure(&mut self) {
        let sample_rate = self.base.sample_rate();
        self.attack_coeff = time_constant_coeff(self.base.param("attack_ms"), sample_rate);
        self.release_coeff = time_constant_coeff(self.base.param("release_ms"), sample_rate);
        self.makeup = db_to_linear(self.base.param("makeup_db"));
        let frames = self.base.param("lookahead_ms") * 0.001 * sample_rate;
        let frames = frames.round() as usize;
        if frames != self.lookahead_frames {
            self.lookahead_frames = frames;
            self.lookahead.clear();
            self.fill_lookahead();
        }
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let channels = self.base.channels();
        let delayed = self.lookahead_frames > 0;
        for frame in block.samples_mut().chunks_exact_mut(channels) {
            let peak = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            let target = self.static_reduction_db(linear_to_db(peak));
            let coeff = if target > self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * target;
            let gain = db_to_linear(-self.envelope_db) * self.makeup;

            for sample in frame.iter_mut() {
                let input = *sample;
                let source = if delayed {
                    self.lookahead.push_back(input);
                    self.lookahead.pop_front().unwrap_or(0.0)
                } else {
                    input
                };
                *sample = source * gain;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.envelope_db = 0.0;
        self.lookahead.clear();
        self.fill_lookahead();
    }

    fn latency_frames(&self) -> usize {
        self.lookahead_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_core::StreamProperties;

    fn loud_block(frames: usize) -> AudioBlock {
        AudioBlock::from_interleaved(vec![0.9; frames * 2], StreamProperties::default())
    }

    #[test]
    fn test_quiet_signal_untouched() {
        let mut comp = Compressor::new();
        let mut block =
            AudioBlock::from_interleaved(vec![0.01; 256], StreamProperties::default());
        comp.process(&mut block).unwrap();
        assert!(block.samples().iter().all(|s| (s - 0.01).abs() < 1e-6));
    }

    #[test]
    fn test_loud_signal_reduced() {
        let mut comp = Compressor::new();
        let mut block = loud_block(4096);
        comp.process(&mut block).unwrap();
        assert!(comp.gain_reduction_db() > 3.0);
        assert!(block.samples()[8000] < 0.9 * 0.7);
    }

    #[test]
    fn test_lookahead_delays_signal() {
        let mut comp = Compressor::new();
        comp.set_parameter("threshold_db", 0.0);
        comp.set_parameter("lookahead_ms", 1.0);
        let latency = comp.latency_frames();
        assert_eq!(latency, 44);

        let mut samples = vec![0.0; 256 * 2];
        samples[0] = 0.5;
        samples[1] = 0.5;
        let mut block = AudioBlock::from_interleaved(samples, StreamProperties::default());
        comp.process(&mut block).unwrap();
        assert!(block.samples()[0].abs() < 1e-6);
        assert!((block.samples()[latency * 2] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_reset_clears_envelope_keeps_parameters() {
        let mut comp = Compressor::new();
        comp.set_parameter("ratio", 8.0);
        let mut block = loud_block(2048);
        comp.process(&mut block).unwrap();
        assert!(comp.gain_reduction_db() > 0.0);

        comp.reset();
        assert!(comp.gain_reduction_db().abs() < f32::EPSILON);
        assert_eq!(comp.get_parameter("ratio"), Some(8.0));
    }
}
