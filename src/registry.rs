// SPDX-License-Identifier: MIT OR Apache-2.0

//! Class-name registry for layer (de)serialization.
//!
//! A serialized layer is a JSON envelope `{"class_name": ..., "config": ...}`.
//! [`LayerRegistry`] maps each class name to a factory that rebuilds the
//! layer from its `config` object, the same way
//! [`MaskingConfig::from_json`](crate::MaskingConfig::from_json) parses a
//! single layer.
//!
//! # Usage
//!
//! ```
//! use candle_masking::{Layer, LayerRegistry, Masking};
//!
//! let registry = LayerRegistry::with_builtins();
//! let json = LayerRegistry::serialize(&Masking::new(-1.0)).unwrap();
//! assert_eq!(json["class_name"], "Masking");
//!
//! let layer = registry.deserialize(&json).unwrap();
//! assert_eq!(layer.class_name(), "Masking");
//! assert_eq!(layer.get_config()["mask_value"], serde_json::json!(-1.0));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MaskingError, Result};
use crate::layer::Layer;
use crate::masking::Masking;

/// Builds a layer from its configuration object.
// TRAIT_OBJECT: the registry hands back heterogeneous layer types
pub type LayerFactory = fn(&Value) -> Result<Box<dyn Layer>>;

/// Wire form of a serialized layer.
#[derive(Debug, Serialize, Deserialize)]
struct LayerEnvelope {
    /// Registered class identifier.
    class_name: String,
    /// Layer-specific configuration object.
    config: Value,
}

/// Factory for the built-in [`Masking`] layer.
fn masking_factory(config: &Value) -> Result<Box<dyn Layer>> {
    Ok(Box::new(Masking::from_json(config)?))
}

// ---------------------------------------------------------------------------
// LayerRegistry
// ---------------------------------------------------------------------------

/// Maps stable class names to layer factories.
#[derive(Debug, Clone, Default)]
pub struct LayerRegistry {
    /// Factories keyed by class name.
    factories: HashMap<String, LayerFactory>,
}

impl LayerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every layer this crate provides
    /// (currently `"Masking"`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut factories: HashMap<String, LayerFactory> = HashMap::new();
        factories.insert(Masking::CLASS_NAME.to_owned(), masking_factory);
        Self { factories }
    }

    /// Register a factory under `class_name`.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Registry`] if the name is already taken.
    pub fn register(
        &mut self,
        class_name: impl Into<String>,
        factory: LayerFactory,
    ) -> Result<&mut Self> {
        let class_name = class_name.into();
        if self.factories.contains_key(&class_name) {
            return Err(MaskingError::Registry(format!(
                "class '{class_name}' is already registered"
            )));
        }
        tracing::debug!(class_name = %class_name, "registering layer class");
        self.factories.insert(class_name, factory);
        Ok(self)
    }

    /// Whether `class_name` has a factory.
    #[must_use]
    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    /// Registered class names, sorted.
    #[must_use]
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a layer of class `class_name` from its configuration object.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Registry`] for unknown classes and propagates
    /// factory errors (typically [`MaskingError::Config`]).
    // TRAIT_OBJECT: caller receives whichever layer type the class names
    pub fn from_config(&self, class_name: &str, config: &Value) -> Result<Box<dyn Layer>> {
        let factory = self.factories.get(class_name).ok_or_else(|| {
            MaskingError::Registry(format!("unknown layer class '{class_name}'"))
        })?;
        tracing::debug!(class_name, "deserializing layer");
        factory(config)
    }

    /// Serialize a layer to its `{"class_name", "config"}` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Registry`] if the envelope cannot be encoded.
    pub fn serialize(layer: &dyn Layer) -> Result<Value> {
        let envelope = LayerEnvelope {
            class_name: layer.class_name().to_owned(),
            config: layer.get_config(),
        };
        serde_json::to_value(envelope)
            .map_err(|e| MaskingError::Registry(format!("encode layer: {e}")))
    }

    /// Rebuild a layer from an envelope produced by [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Registry`] if the envelope is malformed or the
    /// class is unknown; propagates factory errors.
    pub fn deserialize(&self, value: &Value) -> Result<Box<dyn Layer>> {
        let envelope = LayerEnvelope::deserialize(value)
            .map_err(|e| MaskingError::Registry(format!("decode layer: {e}")))?;
        self.from_config(&envelope.class_name, &envelope.config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtins_contain_masking() {
        let registry = LayerRegistry::with_builtins();
        assert!(registry.contains("Masking"));
        assert_eq!(registry.class_names(), vec!["Masking"]);
        assert!(LayerRegistry::new().class_names().is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = LayerRegistry::with_builtins();
        let err = registry.register("Masking", masking_factory).unwrap_err();
        assert!(matches!(err, MaskingError::Registry(_)));

        registry.register("PaddingMask", masking_factory).unwrap();
        assert_eq!(registry.class_names(), vec!["Masking", "PaddingMask"]);
    }

    #[test]
    fn unknown_class_and_bad_envelope() {
        let registry = LayerRegistry::with_builtins();

        let unknown = serde_json::json!({"class_name": "Dense", "config": {}});
        assert!(matches!(
            registry.deserialize(&unknown),
            Err(MaskingError::Registry(_))
        ));

        let missing_config = serde_json::json!({"class_name": "Masking"});
        assert!(matches!(
            registry.deserialize(&missing_config),
            Err(MaskingError::Registry(_))
        ));

        let bad_config = serde_json::json!({"class_name": "Masking", "config": {"mask_value": "x"}});
        assert!(matches!(
            registry.deserialize(&bad_config),
            Err(MaskingError::Config(_))
        ));
    }

    #[test]
    fn envelope_shape() {
        let json = LayerRegistry::serialize(&Masking::new(2.5)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "class_name": "Masking",
                "config": {
                    "mask_value": 2.5,
                    "name": "masking",
                    "trainable": true,
                    "dtype": null
                }
            })
        );
    }
}
