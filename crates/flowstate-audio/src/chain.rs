//! Ordered effects chain.
//!
//! The chain adapts each incoming block to its configured channel count once,
//! then runs every enabled, non-bypassed effect in order. A failing effect
//! (error or non-finite output) has its stage undone; the block continues with
//! the samples from before that effect.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use flowstate_core::{AudioBlock, StreamProperties};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::channels::{adapt_channels, Adaptation};
use crate::effects::{Compressor, Effect, Gain, ParametricEq};

/// Stable handle to an effect inside a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EffectId(u64);

impl EffectId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fx{}", self.0)
    }
}

/// Read-only summary of one chain slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectSummary {
    pub id: EffectId,
    pub name: String,
    pub enabled: bool,
    pub bypassed: bool,
    pub parameters: BTreeMap<String, f32>,
    pub failures: u64,
}

struct Slot {
    id: EffectId,
    effect: Box<dyn Effect>,
    failures: u64,
}

/// Ordered list of effects sharing one stream configuration.
pub struct EffectsChain {
    slots: Vec<Slot>,
    properties: StreamProperties,
    next_id: u64,
    /// Copy of the block taken before each stage, restored on failure.
    scratch: Vec<f32>,
    mismatch_logged: bool,
}

impl EffectsChain {
    pub fn new(properties: StreamProperties) -> Self {
        Self {
            slots: Vec::new(),
            properties,
            next_id: 1,
            scratch: Vec::new(),
            mismatch_logged: false,
        }
    }

    /// Chain preloaded with gain, parametric EQ and compressor.
    pub fn with_default_effects(properties: StreamProperties) -> Self {
        let mut chain = Self::new(properties);
        chain.add(Box::new(Gain::new()));
        chain.add(Box::new(ParametricEq::new()));
        chain.add(Box::new(Compressor::new()));
        chain
    }

    /// Append an effect, configuring it for the chain's stream.
    pub fn add(&mut self, effect: Box<dyn Effect>) -> EffectId {
        let index = self.slots.len();
        self.insert(index, effect)
    }

    /// Insert an effect at `index` (clamped to the chain length).
    pub fn insert(&mut self, index: usize, mut effect: Box<dyn Effect>) -> EffectId {
        effect.set_stream_properties(self.properties);
        let id = EffectId(self.next_id);
        self.next_id += 1;
        info!("Adding effect {} as {id}", effect.name());
        let index = index.min(self.slots.len());
        self.slots.insert(
            index,
            Slot {
                id,
                effect,
                failures: 0,
            },
        );
        id
    }

    /// Remove an effect, returning it.
    pub fn remove(&mut self, id: EffectId) -> Option<Box<dyn Effect>> {
        let index = self.position(id)?;
        let slot = self.slots.remove(index);
        info!("Removed effect {} ({id})", slot.effect.name());
        Some(slot.effect)
    }

    /// Move an effect to a new position in the processing order.
    pub fn move_to(&mut self, id: EffectId, index: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let slot = self.slots.remove(from);
        let index = index.min(self.slots.len());
        self.slots.insert(index, slot);
        true
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Effect ids in processing order.
    pub fn ids(&self) -> Vec<EffectId> {
        self.slots.iter().map(|s| s.id).collect()
    }

    /// Id of the first effect with the given display name.
    pub fn find(&self, name: &str) -> Option<EffectId> {
        self.slots
            .iter()
            .find(|s| s.effect.name().eq_ignore_ascii_case(name))
            .map(|s| s.id)
    }

    pub fn get(&self, id: EffectId) -> Option<&dyn Effect> {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.effect.as_ref())
    }

    pub fn get_mut(&mut self, id: EffectId) -> Option<&mut (dyn Effect + 'static)> {
        self.slots
            .iter_mut()
            .find(|s| s.id == id)
            .map(|s| s.effect.as_mut())
    }

    /// Set one parameter on one effect. False if either is unknown.
    pub fn set_parameter(&mut self, id: EffectId, name: &str, value: f32) -> bool {
        match self.get_mut(id) {
            Some(effect) => effect.set_parameter(name, value),
            None => {
                warn!("No effect {id} in chain");
                false
            }
        }
    }

    pub fn set_enabled(&mut self, id: EffectId, enabled: bool) -> bool {
        let Some(effect) = self.get_mut(id) else {
            return false;
        };
        effect.set_enabled(enabled);
        true
    }

    pub fn set_bypass(&mut self, id: EffectId, bypass: bool) -> bool {
        let Some(effect) = self.get_mut(id) else {
            return false;
        };
        effect.set_bypass(bypass);
        true
    }

    /// Parameter snapshot of every effect, keyed by id.
    pub fn get_parameters(&self) -> BTreeMap<EffectId, BTreeMap<String, f32>> {
        self.slots
            .iter()
            .map(|s| (s.id, s.effect.get_parameters()))
            .collect()
    }

    pub fn summaries(&self) -> Vec<EffectSummary> {
        self.slots
            .iter()
            .map(|s| EffectSummary {
                id: s.id,
                name: s.effect.name().to_string(),
                enabled: s.effect.is_enabled(),
                bypassed: s.effect.is_bypassed(),
                parameters: s.effect.get_parameters(),
                failures: s.failures,
            })
            .collect()
    }

    pub const fn stream_properties(&self) -> StreamProperties {
        self.properties
    }

    /// Reconfigure every effect for a new stream. Effects reset.
    pub fn set_stream_properties(&mut self, properties: StreamProperties) {
        if properties == self.properties {
            return;
        }
        debug!("Effects chain now {properties}");
        self.properties = properties;
        self.mismatch_logged = false;
        for slot in &mut self.slots {
            slot.effect.set_stream_properties(properties);
        }
    }

    /// Reset runtime state of every effect, keeping parameters.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.effect.reset();
        }
    }

    /// Total latency of active effects in frames.
    pub fn latency_frames(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.effect.is_active())
            .map(|s| s.effect.latency_frames())
            .sum()
    }

    /// Run a block through the chain.
    ///
    /// The output has the block's frame count and the chain's channel count,
    /// except for unsupported channel mismatches which pass through unprocessed.
    pub fn process(&mut self, block: AudioBlock) -> AudioBlock {
        let (mut block, adaptation) = adapt_channels(block, self.properties.channels);
        if adaptation == Adaptation::PassedThrough || block.sample_rate() != self.properties.sample_rate
        {
            if !self.mismatch_logged {
                warn!(
                    "Block ({}) does not match chain ({}); skipping effects",
                    block.properties(),
                    self.properties
                );
                self.mismatch_logged = true;
            }
            return block;
        }

        for slot in &mut self.slots {
            if !slot.effect.is_active() {
                continue;
            }
            self.scratch.clear();
            self.scratch.extend_from_slice(block.samples());

            let failure = match slot.effect.process(&mut block) {
                Ok(()) if block.is_finite() => None,
                Ok(()) => Some("non-finite output".to_string()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = failure {
                slot.failures += 1;
                if slot.failures == 1 {
                    error!("Effect {} failed: {reason}; using unprocessed audio", slot.effect.name());
                } else {
                    trace!(
                        "Effect {} failed again ({} total): {reason}",
                        slot.effect.name(),
                        slot.failures
                    );
                }
                block.samples_mut().copy_from_slice(&self.scratch);
            }
        }
        block
    }

    fn position(&self, id: EffectId) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }
}

impl fmt::Debug for EffectsChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectsChain")
            .field("properties", &self.properties)
            .field("effects", &self.slots.iter().map(|s| s.effect.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Chain shared between the controller and the producer thread.
pub type SharedChain = Arc<Mutex<EffectsChain>>;

pub fn shared_chain(chain: EffectsChain) -> SharedChain {
    Arc::new(Mutex::new(chain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectBase, Filter, ParamInfo};
    use flowstate_core::{Error, Result};
    use proptest::prelude::*;

    const STEREO: StreamProperties = StreamProperties {
        sample_rate: 44_100,
        channels: 2,
    };

    /// Writes NaN or returns an error depending on `mode`.
    struct Broken {
        base: EffectBase,
        mode: u8,
    }

    impl Broken {
        fn new(mode: u8) -> Self {
            Self {
                base: EffectBase::new("Broken", vec![ParamInfo::new("x", 0.0)]),
                mode,
            }
        }
    }

    impl Effect for Broken {
        fn base(&self) -> &EffectBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut EffectBase {
            &mut self.base
        }
        fn configure(&mut self) {}
        fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
            if self.mode == 0 {
                block.samples_mut()[0] = f32::NAN;
                Ok(())
            } else {
                block.samples_mut().fill(9.0);
                Err(Error::effect("Broken", "simulated"))
            }
        }
        fn reset(&mut self) {}
    }

    fn gain(db: f32) -> Box<dyn Effect> {
        let mut g = Gain::new();
        g.set_parameter("gain_db", db);
        Box::new(g)
    }

    #[test]
    fn test_effects_applied_in_order() {
        let mut chain = EffectsChain::new(STEREO);
        chain.add(gain(-6.0));
        chain.add(gain(-6.0));
        let out = chain.process(AudioBlock::from_interleaved(vec![1.0; 8], STEREO));
        assert!((out.samples()[0] - 0.251_189).abs() < 1e-4);
    }

    #[test]
    fn test_failing_effect_isolated() {
        for mode in [0, 1] {
            let mut chain = EffectsChain::new(STEREO);
            chain.add(gain(-6.0));
            let broken = chain.add(Box::new(Broken::new(mode)));
            chain.add(gain(-6.0));

            let out = chain.process(AudioBlock::from_interleaved(vec![1.0; 8], STEREO));
            assert!(out.is_finite());
            // Both gains still applied around the failed stage
            assert!((out.samples()[0] - 0.251_189).abs() < 1e-4);
            let summary = chain.summaries();
            assert_eq!(summary[1].id, broken);
            assert_eq!(summary[1].failures, 1);
        }
    }

    #[test]
    fn test_bypassed_effect_skipped() {
        let mut chain = EffectsChain::new(STEREO);
        let id = chain.add(gain(-20.0));
        chain.set_bypass(id, true);
        let input = AudioBlock::from_interleaved(vec![0.5; 8], STEREO);
        assert_eq!(chain.process(input.clone()), input);

        chain.set_bypass(id, false);
        chain.set_enabled(id, false);
        assert_eq!(chain.process(input.clone()), input);
    }

    #[test]
    fn test_remove_and_reorder() {
        let mut chain = EffectsChain::with_default_effects(STEREO);
        assert_eq!(chain.len(), 3);
        let eq = chain.find("parametric eq").unwrap();
        assert!(chain.move_to(eq, 0));
        assert_eq!(chain.ids()[0], eq);
        assert!(chain.remove(eq).is_some());
        assert!(chain.remove(eq).is_none());
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_stream_change_propagates() {
        let mut chain = EffectsChain::new(STEREO);
        let id = chain.add(Box::new(Filter::new()));
        let mono = StreamProperties {
            sample_rate: 22_050,
            channels: 1,
        };
        chain.set_stream_properties(mono);
        assert_eq!(chain.get(id).unwrap().stream_properties(), mono);
    }

    #[test]
    fn test_set_parameter_unknown_effect() {
        let mut chain = EffectsChain::new(STEREO);
        assert!(!chain.set_parameter(EffectId(99), "gain_db", 1.0));
    }

    #[test]
    fn test_unsupported_channels_pass_through() {
        let mut chain = EffectsChain::new(STEREO);
        chain.add(gain(-6.0));
        let surround = StreamProperties {
            sample_rate: 44_100,
            channels: 6,
        };
        let input = AudioBlock::from_interleaved(vec![1.0; 12], surround);
        assert_eq!(chain.process(input.clone()), input);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_output_shape_matches_chain(
            frames in 1usize..256,
            in_channels in 1u16..=8,
            chain_channels in 1u16..=8,
            rate in 1u32..=384_000,
            reconfigure in any::<bool>(),
        ) {
            let props = StreamProperties { sample_rate: rate, channels: chain_channels };
            let mut chain = if reconfigure {
                EffectsChain::new(STEREO)
            } else {
                EffectsChain::new(props)
            };
            for kind in crate::effects::EFFECT_KINDS {
                chain.add(crate::effects::create_effect(kind).unwrap());
            }
            chain.set_stream_properties(props);

            let input_props = StreamProperties { sample_rate: rate, channels: in_channels };
            let samples: Vec<f32> = (0..frames * in_channels as usize)
                .map(|i| ((i as f32) * 0.01).sin() * 0.8)
                .collect();
            let out = chain.process(AudioBlock::from_interleaved(samples, input_props));

            let adapted = in_channels == chain_channels || in_channels == 1 || chain_channels == 1;
            let expected = if adapted { chain_channels } else { in_channels };
            prop_assert!(out.has_shape(frames, expected));
            prop_assert!(out.samples().iter().all(|s| s.is_finite()));
        }
    }
}
