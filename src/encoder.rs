//! Feature encoder: fuses the raw metric, rolling statistics and context
//! into the fixed-order, min-max normalised vector the classifier was
//! trained on.
//!
//! ```text
//!  index:  0          1        2        3       4 .. 10
//!  name:   rms_value  rms_avg  rms_std  is_day  weather one-hot (7 slots)
//! ```
//!
//! The order is a bit-exact contract with the inference engine.  A
//! reordered vector does not fail, it silently mispredicts, so the order
//! lives in exactly one place: [`FEATURE_NAMES`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::{ContextSnapshot, WeatherCategory};
use crate::error::ConfigError;

/// Number of features the trained model consumes.
pub const FEATURE_COUNT: usize = 11;

/// Index of the first weather one-hot slot.
pub const WEATHER_SLOT_OFFSET: usize = 4;

/// Feature names in contract order, exactly as emitted by the training run.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "rms_value",
    "rms_avg",
    "rms_std",
    "is_day",
    "weather_con llovizna",
    "weather_con niebla",
    "weather_con tormentas",
    "weather_lloviendo",
    "weather_llovizna",
    "weather_parcialmente nublado",
    "weather_soleado",
];

/// Which one-hot slot a live weather category activates, if any.
///
/// `weather_llovizna` was a distinct label in the training data that no
/// live weather code produces; it is always zero at inference time.
/// Snowing never occurred during training and has no slot.
pub fn weather_slot(category: WeatherCategory) -> Option<usize> {
    let name = match category {
        WeatherCategory::Drizzle => "weather_con llovizna",
        WeatherCategory::Foggy => "weather_con niebla",
        WeatherCategory::Stormy => "weather_con tormentas",
        WeatherCategory::Raining => "weather_lloviendo",
        WeatherCategory::PartlyCloudy => "weather_parcialmente nublado",
        WeatherCategory::Sunny => "weather_soleado",
        WeatherCategory::Snowing | WeatherCategory::Unknown => return None,
    };
    FEATURE_NAMES.iter().position(|n| *n == name)
}

// ---------------------------------------------------------------------------
// Normalization bounds
// ---------------------------------------------------------------------------

/// Training-time (min, max) for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `max - min`, or 1.0 for a degenerate (constant) feature.
    pub fn denominator(&self) -> f64 {
        let d = self.max - self.min;
        if d == 0.0 { 1.0 } else { d }
    }
}

/// Feature name → (min, max), fixed at deployment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizationBounds(BTreeMap<String, Bound>);

impl NormalizationBounds {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Bounds from the reference training run of the sound classifier.
    pub fn reference() -> Self {
        let mut b = Self::new();
        b.insert("rms_value", Bound::new(1.0, 8572.0));
        b.insert("rms_avg", Bound::new(1.7, 5529.1));
        b.insert("rms_std", Bound::new(0.0, 2_428.442_090_907_025));
        for name in &FEATURE_NAMES[3..] {
            b.insert(name, Bound::new(0.0, 1.0));
        }
        b
    }

    pub fn insert(&mut self, name: &str, bound: Bound) {
        self.0.insert(name.to_string(), bound);
    }

    pub fn remove(&mut self, name: &str) -> Option<Bound> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Bound> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve one bound per feature in contract order.
    ///
    /// Fails on the first missing or inverted entry.  Extra entries for
    /// names outside the contract are ignored.
    pub fn resolve(&self) -> Result<[Bound; FEATURE_COUNT], ConfigError> {
        let mut out = [Bound::new(0.0, 1.0); FEATURE_COUNT];
        for (slot, name) in out.iter_mut().zip(FEATURE_NAMES) {
            let b = self
                .get(name)
                .ok_or_else(|| ConfigError::MissingBound(name.to_string()))?;
            if !b.min.is_finite() || !b.max.is_finite() || b.min > b.max {
                return Err(ConfigError::InvalidBound(name.to_string()));
            }
            *slot = *b;
        }
        Ok(out)
    }
}

impl Default for NormalizationBounds {
    fn default() -> Self {
        Self::reference()
    }
}

// ---------------------------------------------------------------------------
// Feature vector
// ---------------------------------------------------------------------------

/// Normalised model input in contract order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f32; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value by contract feature name.
    pub fn get(&self, name: &str) -> Option<f32> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }

    /// The weather one-hot block.
    pub fn weather_slots(&self) -> &[f32] {
        &self.0[WEATHER_SLOT_OFFSET..]
    }
}

/// Unnormalised features in contract order.
pub fn raw_features(raw: f64, avg: f64, std: f64, ctx: &ContextSnapshot) -> [f64; FEATURE_COUNT] {
    let mut v = [0.0; FEATURE_COUNT];
    v[0] = raw;
    v[1] = avg;
    v[2] = std;
    v[3] = if ctx.is_day { 1.0 } else { 0.0 };
    if let Some(slot) = weather_slot(ctx.weather) {
        v[slot] = 1.0;
    }
    v
}

/// Encoder with bounds resolved once at startup.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    bounds: [Bound; FEATURE_COUNT],
}

impl FeatureEncoder {
    /// Fails if any contract feature lacks a valid bound.  Call at startup.
    pub fn new(bounds: &NormalizationBounds) -> Result<Self, ConfigError> {
        Ok(Self {
            bounds: bounds.resolve()?,
        })
    }

    pub fn encode(&self, raw: f64, avg: f64, std: f64, ctx: &ContextSnapshot) -> FeatureVector {
        let unnormalised = raw_features(raw, avg, std, ctx);
        let mut out = [0.0f32; FEATURE_COUNT];
        for ((o, x), b) in out.iter_mut().zip(unnormalised).zip(&self.bounds) {
            *o = ((x - b.min) / b.denominator()) as f32;
        }
        FeatureVector(out)
    }
}

/// One-shot encode against an unresolved bounds table.
pub fn encode(
    raw: f64,
    avg: f64,
    std: f64,
    ctx: &ContextSnapshot,
    bounds: &NormalizationBounds,
) -> Result<FeatureVector, ConfigError> {
    Ok(FeatureEncoder::new(bounds)?.encode(raw, avg, std, ctx))
}
