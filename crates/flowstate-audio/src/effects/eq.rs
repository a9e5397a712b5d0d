//! Three-band parametric equalizer.

use flowstate_core::{AudioBlock, Result};

use super::biquad::{Biquad, BiquadCoefficients};
use super::{Effect, EffectBase, ParamInfo};

/// Default centre frequencies for the low, mid and high bands.
const BAND_FREQS: [f32; 3] = [100.0, 1000.0, 8000.0];
const BAND_COUNT: usize = BAND_FREQS.len();

/// Peaking EQ with three independently tunable bands.
///
/// Parameters are `band_{n}_freq`, `band_{n}_gain_db` and `band_{n}_q`
/// for `n` in `1..=3`.
pub struct ParametricEq {
    base: EffectBase,
    bands: Vec<Biquad>,
}

impl ParametricEq {
    pub fn new() -> Self {
        let mut params = Vec::with_capacity(BAND_COUNT * 3);
        for (i, freq) in BAND_FREQS.iter().enumerate() {
            let n = i + 1;
            params.push(
                ParamInfo::new(format!("band_{n}_freq"), *freq)
                    .with_range(20.0, 20_000.0)
                    .with_unit("Hz"),
            );
            params.push(
                ParamInfo::new(format!("band_{n}_gain_db"), 0.0)
                    .with_range(-24.0, 24.0)
                    .with_unit("dB"),
            );
            params.push(ParamInfo::new(format!("band_{n}_q"), 1.0).with_range(0.1, 10.0));
        }
        let base = EffectBase::new("Parametric EQ", params);
        let channels = base.channels();
        let mut eq = Self {
            base,
            bands: (0..BAND_COUNT).map(|_| Biquad::new(channels)).collect(),
        };
        eq.configure();
        eq
    }

    /// Coefficients of band `n` (1-based).
    pub fn band_coefficients(&self, n: usize) -> Option<BiquadCoefficients> {
        n.checked_sub(1)
            .and_then(|i| self.bands.get(i))
            .map(Biquad::coefficients)
    }
}

impl Default for ParametricEq {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for ParametricEq {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn configure(&mut self) {
        let sample_rate = self.base.sample_rate();
        let channels = self.base.channels();
        for (i, band) in self.bands.iter_mut().enumerate() {
            let n = i + 1;
            let freq = self.base.param(&format!("band_{n}_freq"));
            let gain_db = self.base.param(&format!("band_{n}_gain_db"));
            let q = self.base.param(&format!("band_{n}_q"));
            band.set_channels(channels);
            band.set_coefficients(BiquadCoefficients::peaking(sample_rate, freq, gain_db, q));
        }
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let samples = block.samples_mut();
        for band in &mut self.bands {
            band.process_interleaved(samples);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.bands.iter_mut().for_each(Biquad::reset);
    }
}
