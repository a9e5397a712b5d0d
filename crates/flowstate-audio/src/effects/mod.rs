//! Effect system: the capability trait, parameter storage and built-in effects.
//!
//! Every effect owns its parameters. All writes go through
//! [`Effect::set_parameter`], which recomputes derived state (coefficients,
//! delay-line sizes) before returning, so the next `process` call always sees
//! a consistent configuration.

pub mod biquad;
pub mod chorus;
pub mod compressor;
pub mod delay;
pub mod eq;
pub mod filter;
pub mod gain;
pub mod reverb;

use std::collections::BTreeMap;

use flowstate_core::{AudioBlock, Result, StreamProperties};
use tracing::{debug, warn};

use crate::channels::adapt_channels;

pub use chorus::Chorus;
pub use compressor::Compressor;
pub use delay::Delay;
pub use eq::ParametricEq;
pub use filter::{Filter, FilterMode};
pub use gain::Gain;
pub use reverb::Reverb;

/// Description of one effect parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    /// Parameter name used by `set_parameter`.
    pub name: String,
    /// Value on construction.
    pub default: f32,
    pub min: f32,
    pub max: f32,
    /// Unit label (e.g. "Hz", "dB", "ms").
    pub unit: &'static str,
    /// Values are rounded to whole numbers on write.
    pub stepped: bool,
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            min: f32::MIN,
            max: f32::MAX,
            unit: "",
            stepped: false,
        }
    }

    /// Set the value range.
    pub const fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the unit label.
    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    /// Round written values to whole numbers.
    pub const fn stepped(mut self) -> Self {
        self.stepped = true;
        self
    }

    fn normalize(&self, value: f32) -> f32 {
        let value = value.clamp(self.min, self.max);
        if self.stepped {
            value.round()
        } else {
            value
        }
    }
}

/// Result of a parameter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamWrite {
    /// The stored value changed; derived state must be recomputed.
    Changed,
    /// The value was already stored.
    Unchanged,
    /// No parameter with that name exists.
    Unknown,
}

/// Named parameter values owned by one effect.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    infos: Vec<ParamInfo>,
    values: Vec<f32>,
}

impl ParameterSet {
    pub fn new(infos: Vec<ParamInfo>) -> Self {
        let values = infos.iter().map(|p| p.normalize(p.default)).collect();
        Self { infos, values }
    }

    pub fn infos(&self) -> &[ParamInfo] {
        &self.infos
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.infos.iter().position(|p| p.name == name)
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.index_of(name).map(|i| self.values[i])
    }

    /// Value of a parameter known to exist; unknown names read as 0.
    pub fn value(&self, name: &str) -> f32 {
        self.get(name).unwrap_or(0.0)
    }

    /// Store a value, clamped to the parameter's range.
    pub fn set(&mut self, name: &str, value: f32) -> ParamWrite {
        let Some(index) = self.index_of(name) else {
            return ParamWrite::Unknown;
        };
        if !value.is_finite() {
            warn!("Ignoring non-finite value for '{name}'");
            return ParamWrite::Unchanged;
        }
        let value = self.infos[index].normalize(value);
        if self.values[index].to_bits() == value.to_bits() {
            return ParamWrite::Unchanged;
        }
        self.values[index] = value;
        ParamWrite::Changed
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.infos.iter().map(|p| p.name.as_str())
    }

    /// Name to value snapshot.
    pub fn snapshot(&self) -> BTreeMap<String, f32> {
        self.infos
            .iter()
            .zip(&self.values)
            .map(|(info, value)| (info.name.clone(), *value))
            .collect()
    }
}

/// State common to every effect: name, parameters, flags and stream properties.
#[derive(Debug, Clone)]
pub struct EffectBase {
    name: String,
    params: ParameterSet,
    enabled: bool,
    bypassed: bool,
    properties: StreamProperties,
}

impl EffectBase {
    pub fn new(name: impl Into<String>, params: Vec<ParamInfo>) -> Self {
        Self {
            name: name.into(),
            params: ParameterSet::new(params),
            enabled: true,
            bypassed: false,
            properties: StreamProperties::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Current value of a parameter.
    pub fn param(&self, name: &str) -> f32 {
        self.params.value(name)
    }

    pub const fn properties(&self) -> StreamProperties {
        self.properties
    }

    pub const fn sample_rate(&self) -> f32 {
        self.properties.sample_rate as f32
    }

    pub const fn channels(&self) -> usize {
        self.properties.channels as usize
    }
}

/// A single DSP transform with parameters and runtime state.
///
/// Implementors provide `configure` (derived state from parameters and stream
/// properties), `process` (the transform on a correctly shaped block) and
/// `reset` (clear filter memory and delay lines, keep parameters). The provided
/// methods implement the parameter, bypass and stream-change protocol on top.
pub trait Effect: Send {
    fn base(&self) -> &EffectBase;

    fn base_mut(&mut self) -> &mut EffectBase;

    /// Recompute all derived state from the current parameters and stream properties.
    ///
    /// Must be a pure function of that input so repeated calls never accumulate.
    fn configure(&mut self);

    /// Transform a block whose channel count matches the configured one.
    fn process(&mut self, block: &mut AudioBlock) -> Result<()>;

    /// Clear transient runtime state. Parameters are preserved.
    fn reset(&mut self);

    /// Latency introduced by the effect in frames.
    fn latency_frames(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Parameter descriptions.
    fn parameter_info(&self) -> &[ParamInfo] {
        self.base().params().infos()
    }

    /// Name to value snapshot of every parameter.
    fn get_parameters(&self) -> BTreeMap<String, f32> {
        self.base().params().snapshot()
    }

    fn get_parameter(&self, name: &str) -> Option<f32> {
        self.base().params().get(name)
    }

    /// Set a parameter and synchronously recompute derived state.
    ///
    /// Unknown names are logged and ignored; returns whether the name was known.
    fn set_parameter(&mut self, name: &str, value: f32) -> bool {
        match self.base_mut().params.set(name, value) {
            ParamWrite::Changed => {
                self.configure();
                true
            }
            ParamWrite::Unchanged => true,
            ParamWrite::Unknown => {
                let available: Vec<&str> = self.base().params().names().collect();
                warn!(
                    "Parameter '{name}' not found in {}. Available: {available:?}",
                    self.name()
                );
                false
            }
        }
    }

    fn stream_properties(&self) -> StreamProperties {
        self.base().properties()
    }

    /// Adopt new stream properties, recomputing derived state and resetting.
    fn set_stream_properties(&mut self, props: StreamProperties) {
        if self.base().properties == props {
            return;
        }
        debug!("Reconfiguring {} for {props}", self.name());
        self.base_mut().properties = props;
        self.configure();
        self.reset();
    }

    fn is_enabled(&self) -> bool {
        self.base().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.base_mut().enabled = enabled;
    }

    fn is_bypassed(&self) -> bool {
        self.base().bypassed
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.base_mut().bypassed = bypass;
    }

    /// Enabled and not bypassed.
    fn is_active(&self) -> bool {
        self.is_enabled() && !self.is_bypassed()
    }

    /// Run the effect on a block of any shape.
    ///
    /// Inactive effects are the identity. Active effects first adapt the
    /// block's channels to their configuration; an unsupported mismatch
    /// passes the block through untouched.
    fn process_block(&mut self, block: AudioBlock) -> Result<AudioBlock> {
        if !self.is_active() {
            return Ok(block);
        }
        let channels = self.stream_properties().channels;
        let (mut block, _) = adapt_channels(block, channels);
        if block.channels() != channels {
            return Ok(block);
        }
        self.process(&mut block)?;
        Ok(block)
    }
}

/// Names accepted by [`create_effect`].
pub const EFFECT_KINDS: [&str; 7] =
    ["gain", "eq", "filter", "compressor", "delay", "reverb", "chorus"];

/// Construct a built-in effect by kind name.
pub fn create_effect(kind: &str) -> Option<Box<dyn Effect>> {
    let effect: Box<dyn Effect> = match kind.to_ascii_lowercase().as_str() {
        "gain" => Box::new(Gain::new()),
        "eq" | "parametric_eq" | "equalizer" => Box::new(ParametricEq::new()),
        "filter" | "lowpass" | "highpass" => Box::new(Filter::new()),
        "compressor" => Box::new(Compressor::new()),
        "delay" | "echo" => Box::new(Delay::new()),
        "reverb" => Box::new(Reverb::new()),
        "chorus" => Box::new(Chorus::new()),
        _ => return None,
    };
    Some(effect)
}

/// Convert decibels to a linear amplitude factor.
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Convert a linear amplitude factor to decibels, flooring silence at -120 dB.
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-6).log10()
}

/// One-pole smoothing coefficient for a time constant in milliseconds.
pub fn time_constant_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = ms * 0.001 * sample_rate;
    if samples <= 0.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}
