// SPDX-License-Identifier: MIT OR Apache-2.0

//! Linear layer stack with mask propagation.
//!
//! [`Sequential`] feeds each layer's output into the next one and threads the
//! published mask alongside it. A layer that declares
//! [`supports_masking`](Layer::supports_masking) receives the upstream mask;
//! handing a mask to any other layer is an error, so masked positions can
//! never be silently ignored.

use candle_core::Tensor;
use serde_json::Value;

use crate::error::{MaskingError, Result};
use crate::layer::{Layer, MaskedTensor};
use crate::registry::LayerRegistry;
use crate::shape::ShapeSpec;

/// Ordered stack of single-input layers.
///
/// # Example
///
/// ```
/// use candle_masking::{Masking, Sequential};
/// use candle_core::{Device, Tensor};
///
/// let mut model = Sequential::new();
/// model.push(Masking::new(0.0));
///
/// let input = Tensor::new(&[[[0f32, 0.], [3., 4.]]], &Device::Cpu).unwrap();
/// let result = model.forward(&input).unwrap();
/// assert_eq!(result.mask().unwrap().to_vec2::<u8>().unwrap(), vec![vec![0, 1]]);
/// ```
#[derive(Default)]
pub struct Sequential {
    /// Layers in execution order.
    // TRAIT_OBJECT: heterogeneous layer types require dynamic dispatch
    layers: Vec<Box<dyn Layer>>,
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.layers.iter().map(|layer| layer.name()).collect();
        f.debug_struct("Sequential").field("layers", &names).finish()
    }
}

impl Sequential {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer.
    pub fn push<L: Layer + 'static>(&mut self, layer: L) -> &mut Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Append an already boxed layer (e.g. one built by a [`LayerRegistry`]).
    // TRAIT_OBJECT: registry output is already type-erased
    pub fn push_boxed(&mut self, layer: Box<dyn Layer>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the stack has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The layers in execution order.
    // TRAIT_OBJECT: exposes the stored boxes as-is
    #[must_use]
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Run every layer in order, threading the published mask.
    ///
    /// Each layer's returned mask is exactly what the next layer receives: a
    /// layer that keeps the timestep axis forwards the incoming mask itself,
    /// a layer that consumes it (pooling, loss) returns none. An empty stack
    /// returns the input without a mask.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::MaskNotSupported`] when a mask reaches a layer
    /// that does not support masking, and propagates layer errors.
    pub fn forward(&self, input: &Tensor) -> Result<MaskedTensor> {
        let mut current = MaskedTensor::new(input.clone());

        for layer in &self.layers {
            let (hidden, mask) = current.into_parts();
            if mask.is_some() && !layer.supports_masking() {
                return Err(MaskingError::MaskNotSupported {
                    layer: layer.name().to_owned(),
                });
            }

            current = layer.call(std::slice::from_ref(&hidden), mask.as_ref())?;

            tracing::debug!(
                layer = layer.name(),
                dims = ?current.output().dims(),
                masked = current.mask().is_some(),
                "layer forward",
            );
        }

        Ok(current)
    }

    /// Chain shape inference through every layer.
    #[must_use]
    pub fn compute_output_shape(&self, input_shape: &ShapeSpec) -> ShapeSpec {
        self.layers
            .iter()
            .fold(input_shape.clone(), |shape, layer| {
                layer.compute_output_shape(&shape)
            })
    }

    /// Serialize as `{"layers": [<envelope>, ...]}`.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Registry`] if a layer envelope cannot be encoded.
    pub fn get_config(&self) -> Result<Value> {
        let layers = self
            .layers
            .iter()
            .map(|layer| LayerRegistry::serialize(layer.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::json!({ "layers": layers }))
    }

    /// Rebuild a stack from [`get_config`](Self::get_config) output.
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Config`] if `layers` is missing or not an array,
    /// and propagates registry errors for each entry.
    pub fn from_config(config: &Value, registry: &LayerRegistry) -> Result<Self> {
        let entries = config
            .get("layers")
            .and_then(Value::as_array)
            .ok_or_else(|| MaskingError::Config("missing or invalid field 'layers'".into()))?;

        let mut model = Self::new();
        for entry in entries {
            model.push_boxed(registry.deserialize(entry)?);
        }
        Ok(model)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
