//! Resonant low/high-pass filter.

use flowstate_core::{AudioBlock, Result};

use super::biquad::{Biquad, BiquadCoefficients};
use super::{Effect, EffectBase, ParamInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    LowPass,
    HighPass,
}

impl FilterMode {
    /// Decode the `mode` parameter (0 low-pass, 1 high-pass).
    pub fn from_param(value: f32) -> Self {
        if value >= 0.5 {
            Self::HighPass
        } else {
            Self::LowPass
        }
    }

    pub const fn as_param(self) -> f32 {
        match self {
            Self::LowPass => 0.0,
            Self::HighPass => 1.0,
        }
    }
}

/// Biquad filter with `freq`, `q` and `mode` parameters.
pub struct Filter {
    base: EffectBase,
    biquad: Biquad,
}

impl Filter {
    pub fn new() -> Self {
        let base = EffectBase::new(
            "Filter",
            vec![
                ParamInfo::new("freq", 1000.0)
                    .with_range(20.0, 20_000.0)
                    .with_unit("Hz"),
                ParamInfo::new("q", 0.707).with_range(0.1, 10.0),
                ParamInfo::new("mode", 0.0).with_range(0.0, 1.0).stepped(),
            ],
        );
        let channels = base.channels();
        let mut filter = Self {
            base,
            biquad: Biquad::new(channels),
        };
        filter.configure();
        filter
    }

    pub fn mode(&self) -> FilterMode {
        FilterMode::from_param(self.base.param("mode"))
    }

    pub fn set_mode(&mut self, mode: FilterMode) {
        self.set_parameter("mode", mode.as_param());
    }

    /// Active coefficients.
    pub const fn coefficients(&self) -> BiquadCoefficients {
        self.biquad.coefficients()
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Filter {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn configure(&mut self) {
        let sample_rate = self.base.sample_rate();
        let freq = self.base.param("freq");
        let q = self.base.param("q");
        let coefficients = match self.mode() {
            FilterMode::LowPass => BiquadCoefficients::lowpass(sample_rate, freq, q),
            FilterMode::HighPass => BiquadCoefficients::highpass(sample_rate, freq, q),
        };
        self.biquad.set_channels(self.base.channels());
        self.biquad.set_coefficients(coefficients);
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        self.biquad.process_interleaved(block.samples_mut());
        Ok(())
    }

    fn reset(&mut self) {
        self.biquad.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_core::StreamProperties;

    #[test]
    fn test_hundred_rapid_sets_equal_single_set() {
        let mut rapid = Filter::new();
        for i in 0..100 {
            rapid.set_parameter("freq", 200.0 + i as f32 * 73.0);
        }
        rapid.set_parameter("freq", 2500.0);

        let mut direct = Filter::new();
        direct.set_parameter("freq", 2500.0);

        assert_eq!(rapid.coefficients(), direct.coefficients());
    }

    #[test]
    fn test_mode_switch_changes_response() {
        let mut filter = Filter::new();
        let lowpass = filter.coefficients();
        filter.set_mode(FilterMode::HighPass);
        assert_eq!(filter.mode(), FilterMode::HighPass);
        assert_ne!(filter.coefficients(), lowpass);
    }

    #[test]
    fn test_stream_change_recomputes_coefficients() {
        let mut filter = Filter::new();
        let at_44k = filter.coefficients();
        filter.set_stream_properties(StreamProperties {
            sample_rate: 96_000,
            channels: 2,
        });
        assert_ne!(filter.coefficients(), at_44k);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_reset_preserves_parameters() {
        let mut filter = Filter::new();
        filter.set_parameter("freq", 330.0);
        filter.set_parameter("q", 2.0);
        let mut block = AudioBlock::from_interleaved(vec![0.8; 128], StreamProperties::default());
        filter.process(&mut block).unwrap();
        filter.reset();
        assert_eq!(filter.get_parameter("freq"), Some(330.0));
        assert_eq!(filter.get_parameter("q"), Some(2.0));
    }
}
