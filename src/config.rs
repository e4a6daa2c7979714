// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layer configuration and its JSON representation.
//!
//! [`LayerConfig`] carries the generic fields every layer owns (name,
//! trainability, compute dtype). [`MaskingConfig`] adds the sentinel value
//! for the [`Masking`](crate::Masking) layer. Both serialize to a flat JSON
//! object; the sentinel is stored under the `mask_value` key.
//!
//! # Usage
//!
//! ```
//! use candle_masking::MaskingConfig;
//!
//! let json = serde_json::json!({"name": "pad_mask", "mask_value": -1.0});
//! let config = MaskingConfig::from_json(&json).unwrap();
//! assert_eq!(config.base.name, "pad_mask");
//! assert!((config.mask_value + 1.0).abs() < f64::EPSILON);
//! assert_eq!(config.to_json()["mask_value"], serde_json::json!(-1.0));
//! ```

use candle_core::{DType, Tensor};
use serde_json::{Map, Number, Value};

use crate::error::{MaskingError, Result};

/// JSON key under which the sentinel value is persisted.
pub const MASK_VALUE_KEY: &str = "mask_value";

/// Default layer name for [`MaskingConfig`].
pub const DEFAULT_MASKING_NAME: &str = "masking";

// ---------------------------------------------------------------------------
// LayerConfig
// ---------------------------------------------------------------------------

/// Generic configuration shared by all layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// Layer name, used in error messages and logs.
    pub name: String,
    /// Whether the layer's weights would be updated during training.
    ///
    /// Recorded and exported only; this crate does not train.
    pub trainable: bool,
    /// Floating dtype that floating inputs are cast to before the call.
    /// `None` keeps the input dtype.
    pub dtype: Option<DType>,
}

impl LayerConfig {
    /// Create a trainable config with the given name and no dtype pin.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trainable: true,
            dtype: None,
        }
    }

    /// Pin the compute dtype.
    #[must_use]
    pub const fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Set the trainable flag.
    #[must_use]
    pub const fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// Serialize to a JSON object map (`name`, `trainable`, `dtype`).
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        // BORROW: explicit .clone() since the map owns its strings
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("trainable".into(), Value::Bool(self.trainable));
        let dtype = self
            .dtype
            .map_or(Value::Null, |dt| Value::String(dt.as_str().to_owned()));
        map.insert("dtype".into(), dtype);
        map
    }

    /// Parse the generic fields from a JSON object.
    ///
    /// Missing fields fall back to `default_name`, `trainable = true` and no
    /// dtype pin.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Config`] if `config` is not an object, a field
    /// has the wrong JSON type, or `dtype` names an unknown dtype.
    pub fn from_json(config: &Value, default_name: &str) -> Result<Self> {
        if !config.is_object() {
            return Err(MaskingError::Config(format!(
                "layer config must be a JSON object, got {config}"
            )));
        }
        let name = get_str_or(config, "name", default_name)?;
        let trainable = get_bool_or(config, "trainable", true)?;
        let dtype = match config.get("dtype") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                s.parse::<DType>()
                    .map_err(|e| MaskingError::Config(format!("invalid dtype '{s}': {e}")))?,
            ),
            Some(other) => {
                return Err(MaskingError::Config(format!(
                    "field 'dtype' must be a string or null, got {other}"
                )));
            }
        };
        Ok(Self {
            name,
            trainable,
            dtype,
        })
    }

    /// Generic pre-call hook: cast a floating input to the pinned dtype.
    ///
    /// Integer inputs, and all inputs when no dtype is pinned, are returned
    /// unchanged (a cheap reference-counted clone).
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Model`] if the cast fails.
    pub fn prepare_input(&self, input: &Tensor) -> Result<Tensor> {
        match self.dtype {
            Some(target)
                if target.is_float() && input.dtype().is_float() && input.dtype() != target =>
            {
                tracing::trace!(
                    layer = %self.name,
                    from = input.dtype().as_str(),
                    to = target.as_str(),
                    "casting input to layer dtype",
                );
                Ok(input.to_dtype(target)?)
            }
            _ => Ok(input.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// MaskingConfig
// ---------------------------------------------------------------------------

/// Configuration of a [`Masking`](crate::Masking) layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskingConfig {
    /// Sentinel value: a timestep whose features all equal it is masked.
    pub mask_value: f64,
    /// Generic layer fields.
    pub base: LayerConfig,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl MaskingConfig {
    /// Config with the given sentinel and default generic fields.
    #[must_use]
    pub fn new(mask_value: f64) -> Self {
        Self {
            mask_value,
            base: LayerConfig::new(DEFAULT_MASKING_NAME),
        }
    }

    /// Replace the generic fields.
    #[must_use]
    pub fn with_base(mut self, base: LayerConfig) -> Self {
        self.base = base;
        self
    }

    /// Serialize as `{"mask_value": ..., "name": ..., "trainable": ..., "dtype": ...}`.
    ///
    /// Non-finite sentinels are written as `"NaN"`, `"Infinity"` or
    /// `"-Infinity"`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = self.base.to_json();
        map.insert(MASK_VALUE_KEY.into(), f64_to_json(self.mask_value));
        Value::Object(map)
    }

    /// Parse from a JSON object produced by [`to_json`](Self::to_json).
    ///
    /// A missing `mask_value` defaults to `0.0`.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Config`] if the generic fields are invalid or
    /// `mask_value` is neither a number nor a recognised non-finite string.
    pub fn from_json(config: &Value) -> Result<Self> {
        let base = LayerConfig::from_json(config, DEFAULT_MASKING_NAME)?;
        let mask_value = match config.get(MASK_VALUE_KEY) {
            None => 0.0,
            Some(value) => f64_from_json(value, MASK_VALUE_KEY)?,
        };
        Ok(Self { mask_value, base })
    }
}

// ---------------------------------------------------------------------------
// JSON extraction helpers
// ---------------------------------------------------------------------------

/// Encode an `f64`, spelling out non-finite values as strings.
fn f64_to_json(value: f64) -> Value {
    Number::from_f64(value).map_or_else(
        || {
            let text = if value.is_nan() {
                "NaN"
            } else if value.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            };
            Value::String(text.to_owned())
        },
        Value::Number,
    )
}

/// Decode an `f64` written by [`f64_to_json`].
fn f64_from_json(value: &Value, key: &str) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| MaskingError::Config(format!("field '{key}' is not a finite number"))),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(MaskingError::Config(format!(
                "field '{key}' has invalid value '{other}'"
            ))),
        },
        other => Err(MaskingError::Config(format!(
            "field '{key}' must be a number, got {other}"
        ))),
    }
}

/// Extract a string field, returning a default if absent.
fn get_str_or(config: &Value, key: &str, default: &str) -> Result<String> {
    match config.get(key) {
        None => Ok(default.to_owned()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(MaskingError::Config(format!(
            "field '{key}' must be a string, got {other}"
        ))),
    }
}

/// Extract a `bool` field, returning a default if absent.
fn get_bool_or(config: &Value, key: &str, default: bool) -> Result<bool> {
    match config.get(key) {
        None => Ok(default),
        Some(value) => value.as_bool().ok_or_else(|| {
            MaskingError::Config(format!("field '{key}' must be a bool, got {value}"))
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
