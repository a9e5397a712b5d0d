//! Second-order IIR sections (RBJ audio EQ cookbook).

use std::f32::consts::PI;

/// Normalized biquad coefficients (`a0` divided out).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoefficients {
    /// Pass-through section.
    pub const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    pub fn lowpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let (cos_w, alpha) = prewarp(sample_rate, freq, q);
        let b1 = 1.0 - cos_w;
        Self::normalized(b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
    }

    pub fn highpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let (cos_w, alpha) = prewarp(sample_rate, freq, q);
        let b1 = -(1.0 + cos_w);
        Self::normalized(-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_w, 1.0 - alpha)
    }

    /// Peaking bell boosting or cutting `gain_db` around `freq`.
    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        if gain_db.abs() < 1e-4 {
            return Self::IDENTITY;
        }
        let a = 10f32.powf(gain_db / 40.0);
        let (cos_w, alpha) = prewarp(sample_rate, freq, q);
        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w,
            1.0 - alpha / a,
        )
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Returns `(cos(w0), alpha)` with the frequency kept below Nyquist.
fn prewarp(sample_rate: f32, freq: f32, q: f32) -> (f32, f32) {
    let nyquist = sample_rate * 0.5;
    let ceiling = nyquist * 0.99;
    let freq = freq.clamp(ceiling.min(1.0), ceiling);
    let w0 = 2.0 * PI * freq / sample_rate;
    let q = q.max(0.01);
    (w0.cos(), w0.sin() / (2.0 * q))
}

/// Per-channel filter memory, transposed direct form II.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    z1: f32,
    z2: f32,
}

impl BiquadState {
    #[inline]
    pub fn tick(&mut self, c: &BiquadCoefficients, x: f32) -> f32 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One biquad section applied independently to each channel of interleaved audio.
#[derive(Debug, Clone)]
pub struct Biquad {
    coefficients: BiquadCoefficients,
    states: Vec<BiquadState>,
}

impl Biquad {
    pub fn new(channels: usize) -> Self {
        Self {
            coefficients: BiquadCoefficients::IDENTITY,
            states: vec![BiquadState::default(); channels],
        }
    }

    pub const fn coefficients(&self) -> BiquadCoefficients {
        self.coefficients
    }

    /// Replace the coefficients, keeping filter memory.
    pub fn set_coefficients(&mut self, coefficients: BiquadCoefficients) {
        self.coefficients = coefficients;
    }

    /// Resize filter memory for a new channel count.
    pub fn set_channels(&mut self, channels: usize) {
        self.states.resize(channels, BiquadState::default());
    }

    pub fn process_interleaved(&mut self, samples: &mut [f32]) {
        let channels = self.states.len();
        if channels == 0 || self.coefficients.is_identity() {
            return;
        }
        for frame in samples.chunks_exact_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(self.states.iter_mut()) {
                *sample = state.tick(&self.coefficients, *sample);
            }
        }
    }

    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(BiquadState::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_lowpass_attenuates_high_frequencies() {
        let mut filter = Biquad::new(1);
        filter.set_coefficients(BiquadCoefficients::lowpass(44_100.0, 500.0, 0.707));
        let mut high = sine(10_000.0, 44_100.0, 4410);
        filter.process_interleaved(&mut high);
        assert!(rms(&high[441..]) < 0.05);

        filter.reset();
        let mut low = sine(100.0, 44_100.0, 4410);
        filter.process_interleaved(&mut low);
        assert!(rms(&low[441..]) > 0.6);
    }

    #[test]
    fn test_highpass_attenuates_low_frequencies() {
        let mut filter = Biquad::new(1);
        filter.set_coefficients(BiquadCoefficients::highpass(44_100.0, 5000.0, 0.707));
        let mut low = sine(50.0, 44_100.0, 4410);
        filter.process_interleaved(&mut low);
        assert!(rms(&low[441..]) < 0.05);
    }

    #[test]
    fn test_flat_peaking_is_identity() {
        assert!(BiquadCoefficients::peaking(48_000.0, 1000.0, 0.0, 1.0).is_identity());
    }

    #[test]
    fn test_frequency_above_nyquist_is_clamped() {
        let c = BiquadCoefficients::lowpass(8000.0, 20_000.0, 0.707);
        assert!(c.b0.is_finite() && c.a1.is_finite() && c.a2.is_finite());
    }
}
