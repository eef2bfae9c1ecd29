//! Generation-control parameters shared by every synthesis endpoint.
//!
//! Values are passed through to the model unchanged; the gateway only checks
//! that each one is finite and inside the range the UI exposes.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Maximum accepted text length, in characters.
pub const MAX_TEXT_CHARS: usize = 500;

/// Inclusive bounds for one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f32,
    pub max: f32,
}

impl Bounds {
    const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    fn contains(self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

pub const EXAGGERATION: Bounds = Bounds::new(0.25, 2.0);
pub const CFG_WEIGHT: Bounds = Bounds::new(0.0, 1.0);
pub const TEMPERATURE: Bounds = Bounds::new(0.05, 5.0);
pub const REPETITION_PENALTY: Bounds = Bounds::new(1.0, 2.0);
pub const MIN_P: Bounds = Bounds::new(0.0, 1.0);
pub const TOP_P: Bounds = Bounds::new(0.0, 1.0);

/// Sampling and style controls for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Emotional intensity; 0.5 is neutral.
    pub exaggeration: f32,
    /// Classifier-free guidance weight, which also drives pacing.
    pub cfg_weight: f32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    /// Minimum-probability sampling threshold.
    pub min_p: f32,
    /// Nucleus sampling threshold; 1.0 disables it.
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            exaggeration: 0.5,
            cfg_weight: 0.5,
            temperature: 0.8,
            repetition_penalty: 1.2,
            min_p: 0.05,
            top_p: 1.0,
        }
    }
}

impl GenerationParams {
    /// Parameter names, in the order [`Self::values`] returns them.
    pub const NAMES: [&'static str; 6] = [
        "exaggeration",
        "cfg_weight",
        "temperature",
        "repetition_penalty",
        "min_p",
        "top_p",
    ];

    pub fn values(&self) -> [f32; 6] {
        [
            self.exaggeration,
            self.cfg_weight,
            self.temperature,
            self.repetition_penalty,
            self.min_p,
            self.top_p,
        ]
    }

    /// Value of the named parameter, if it is one of [`Self::NAMES`].
    pub fn get(&self, name: &str) -> Option<f32> {
        Self::NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values()[i])
    }

    /// Set a parameter from its textual form (form fields, query strings).
    ///
    /// Unknown names are ignored and reported as `Ok(false)`.
    pub fn set_from_str(&mut self, name: &str, raw: &str) -> Result<bool, GatewayError> {
        let slot = match name {
            "exaggeration" => &mut self.exaggeration,
            "cfg_weight" => &mut self.cfg_weight,
            "temperature" => &mut self.temperature,
            "repetition_penalty" => &mut self.repetition_penalty,
            "min_p" => &mut self.min_p,
            "top_p" => &mut self.top_p,
            _ => return Ok(false),
        };
        *slot = raw.trim().parse().map_err(|_| GatewayError::InvalidParameter {
            name: name.to_string(),
            value: raw.to_string(),
        })?;
        Ok(true)
    }

    /// Reject non-finite and out-of-range values.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let bounds = [
            EXAGGERATION,
            CFG_WEIGHT,
            TEMPERATURE,
            REPETITION_PENALTY,
            MIN_P,
            TOP_P,
        ];
        for ((name, value), b) in Self::NAMES.into_iter().zip(self.values()).zip(bounds) {
            if !b.contains(value) {
                return Err(GatewayError::ParameterOutOfRange {
                    name,
                    min: b.min,
                    max: b.max,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Check the text of a synthesis request: non-blank and at most
/// [`MAX_TEXT_CHARS`] characters.
pub fn validate_text(text: &str) -> Result<(), GatewayError> {
    if text.trim().is_empty() {
        return Err(GatewayError::EmptyText);
    }
    let len = text.chars().count();
    if len > MAX_TEXT_CHARS {
        return Err(GatewayError::TextTooLong { max: MAX_TEXT_CHARS, len });
    }
    Ok(())
}
