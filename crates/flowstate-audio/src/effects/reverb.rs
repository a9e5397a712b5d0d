//! Schroeder/Moorer reverb in the Freeverb topology.

use flowstate_core::{AudioBlock, Result};

use super::{Effect, EffectBase, ParamInfo};

/// Comb and allpass lengths tuned at 44.1 kHz.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
/// Extra length per channel to decorrelate left and right.
const STEREO_SPREAD: usize = 23;
const INPUT_GAIN: f32 = 0.015;
const ALLPASS_FEEDBACK: f32 = 0.5;
const TUNING_RATE: f32 = 44_100.0;

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    filter_store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            filter_store: 0.0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * (1.0 - damp) + self.filter_store * damp;
        self.buffer[self.index] = input + self.filter_store * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.filter_store = 0.0;
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        buffered - input
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// Comb and allpass bank for one channel.
#[derive(Debug, Clone)]
struct Tank {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Tank {
    fn new(scale: f32, offset: usize) -> Self {
        let scaled = |len: usize| ((len + offset) as f32 * scale).round() as usize;
        Self {
            combs: COMB_TUNING.iter().map(|&l| Comb::new(scaled(l))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&l| Allpass::new(scaled(l))).collect(),
        }
    }

    fn tick(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let mut out = self
            .combs
            .iter_mut()
            .map(|c| c.tick(input, feedback, damp))
            .sum::<f32>();
        for allpass in &mut self.allpasses {
            out = allpass.tick(out);
        }
        out
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(Comb::clear);
        self.allpasses.iter_mut().for_each(Allpass::clear);
    }
}

/// Room reverb with `room_size`, `damping`, `width` and `mix` parameters.
pub struct Reverb {
    base: EffectBase,
    tanks: Vec<Tank>,
    tank_layout: (u32, usize),
    feedback: f32,
    damp: f32,
}

impl Reverb {
    pub fn new() -> Self {
        let base = EffectBase::new(
            "Reverb",
            vec![
                ParamInfo::new("room_size", 0.5).with_range(0.0, 1.0),
                ParamInfo::new("damping", 0.5).with_range(0.0, 1.0),
                ParamInfo::new("width", 1.0).with_range(0.0, 1.0),
                ParamInfo::new("mix", 0.25).with_range(0.0, 1.0),
            ],
        );
        let mut reverb = Self {
            base,
            tanks: Vec::new(),
            tank_layout: (0, 0),
            feedback: 0.0,
            damp: 0.0,
        };
        reverb.configure();
        reverb
    }
}

impl Default for Reverb {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Reverb {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn configure(&mut self) {
        self.feedback = self.base.param("room_size").mul_add(0.28, 0.7);
        self.damp = self.base.param("damping") * 0.4;

        let layout = (self.base.properties().sample_rate, self.base.channels());
        if layout != self.tank_layout {
            let scale = self.base.sample_rate() / TUNING_RATE;
            self.tanks = (0..layout.1)
                .map(|ch| Tank::new(scale, ch * STEREO_SPREAD))
                .collect();
            self.tank_layout = layout;
        }
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let channels = self.base.channels();
        let mix = self.base.param("mix");
        let width = self.base.param("width");
        let mut wet = vec![0.0f32; channels];

        for frame in block.samples_mut().chunks_exact_mut(channels) {
            let input = frame.iter().sum::<f32>() / channels as f32 * INPUT_GAIN;
            for (ch, tank) in self.tanks.iter_mut().enumerate() {
                wet[ch] = tank.tick(input, self.feedback, self.damp);
            }
            let mean = wet.iter().sum::<f32>() / channels as f32;
            for (ch, sample) in frame.iter_mut().enumerate() {
                // Width 0 collapses every channel onto the mean
                let spread = mean + (wet[ch] - mean) * width;
                *sample = *sample * (1.0 - mix) + spread * mix;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.tanks.iter_mut().for_each(Tank::clear);
    }
}
