// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core layer trait and the masked output pair.
//!
//! [`Layer`] is the capability set a host framework needs from a layer:
//! configuration, shape inference, a forward entry point and a mask-support
//! declaration. [`MaskedTensor`] is what a forward call returns: the output
//! tensor plus the mask the layer publishes for downstream layers.

use candle_core::Tensor;
use serde_json::Value;

use crate::config::LayerConfig;
use crate::error::{MaskingError, Result};
use crate::shape::ShapeSpec;

// ---------------------------------------------------------------------------
// Layer trait
// ---------------------------------------------------------------------------

/// Unified interface for layers that participate in mask propagation.
///
/// Implementors return the mask they want forwarded together with their
/// output; the composing adapter ([`Sequential`](crate::Sequential)) decides
/// where it goes next.
pub trait Layer: Send + Sync {
    // --- Metadata --------------------------------------------------------

    /// Stable class identifier used by the [`LayerRegistry`](crate::LayerRegistry).
    fn class_name(&self) -> &'static str;

    /// Generic configuration (name, trainability, dtype).
    fn config(&self) -> &LayerConfig;

    /// Layer name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Whether this layer accepts an incoming mask.
    ///
    /// Layers that return `false` must never be handed a mask.
    fn supports_masking(&self) -> bool {
        false
    }

    // --- Shape inference -------------------------------------------------

    /// Output shape for a given input shape, without touching tensor data.
    fn compute_output_shape(&self, input_shape: &ShapeSpec) -> ShapeSpec;

    // --- Forward pass ----------------------------------------------------

    /// Forward pass.
    ///
    /// `mask` is the mask published by the upstream layer, if any.
    ///
    /// # Errors
    ///
    /// Implementation specific; see each layer.
    fn call(&self, inputs: &[Tensor], mask: Option<&Tensor>) -> Result<MaskedTensor>;

    // --- Serialization ---------------------------------------------------

    /// Configuration from which the registry can rebuild an equivalent layer.
    fn get_config(&self) -> Value;
}

/// Extract the one tensor a single-input layer expects.
///
/// # Errors
///
/// Returns [`MaskingError::MultipleInputs`] unless `inputs` holds exactly one
/// tensor.
pub fn single_input(inputs: &[Tensor]) -> Result<&Tensor> {
    match inputs {
        [input] => Ok(input),
        _ => Err(MaskingError::MultipleInputs {
            count: inputs.len(),
        }),
    }
}

// ---------------------------------------------------------------------------
// MaskedTensor
// ---------------------------------------------------------------------------

/// A layer output together with the mask it publishes.
///
/// # Example
///
/// ```
/// use candle_masking::MaskedTensor;
/// use candle_core::{DType, Device, Tensor};
///
/// let output = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
/// let mask = Tensor::ones((2, 3), DType::U8, &Device::Cpu).unwrap();
/// let masked = MaskedTensor::with_mask(output, mask);
///
/// assert_eq!(masked.output().dims(), &[2, 3, 4]);
/// assert_eq!(masked.mask().unwrap().dims(), &[2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct MaskedTensor {
    /// Primary result of the forward pass.
    output: Tensor,
    /// Published `u8` mask (`1` = keep), if the layer produces one.
    mask: Option<Tensor>,
}

impl MaskedTensor {
    /// Output without a mask.
    #[must_use]
    pub const fn new(output: Tensor) -> Self {
        Self { output, mask: None }
    }

    /// Output with a published mask.
    #[must_use]
    pub const fn with_mask(output: Tensor, mask: Tensor) -> Self {
        Self {
            output,
            mask: Some(mask),
        }
    }

    /// Output with an optional mask.
    #[must_use]
    pub const fn from_parts(output: Tensor, mask: Option<Tensor>) -> Self {
        Self { output, mask }
    }

    /// The output tensor.
    #[must_use]
    pub const fn output(&self) -> &Tensor {
        &self.output
    }

    /// The published mask, if any.
    #[must_use]
    pub const fn mask(&self) -> Option<&Tensor> {
        self.mask.as_ref()
    }

    /// Consume and return only the output tensor.
    #[must_use]
    pub fn into_output(self) -> Tensor {
        self.output
    }

    /// Consume and return `(output, mask)`.
    #[must_use]
    pub fn into_parts(self) -> (Tensor, Option<Tensor>) {
        (self.output, self.mask)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
