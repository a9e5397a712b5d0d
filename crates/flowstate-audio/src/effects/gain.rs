//! Gain stage.

use flowstate_core::{AudioBlock, Result};

use super::{db_to_linear, Effect, EffectBase, ParamInfo};

/// Applies a fixed gain in decibels.
pub struct Gain {
    base: EffectBase,
    linear: f32,
}

impl Gain {
    pub fn new() -> Self {
        let base = EffectBase::new(
            "Gain",
            vec![ParamInfo::new("gain_db", 0.0)
                .with_range(-60.0, 24.0)
                .with_unit("dB")],
        );
        let mut gain = Self { base, linear: 1.0 };
        gain.configure();
        gain
    }

    /// Current linear factor.
    pub const fn linear(&self) -> f32 {
        self.linear
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Gain {
    fn base(&self) -> &EffectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EffectBase {
        &mut self.base
    }

    fn configure(&mut self) {
        self.linear = db_to_linear(self.base.param("gain_db"));
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let gain = self.linear;
        block.samples_mut().iter_mut().for_each(|s| *s *= gain);
        Ok(())
    }

    fn reset(&mut self) {}
}
