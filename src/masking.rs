// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sentinel-value timestep masking.
//!
//! A timestep is *masked* when every feature at that timestep equals the
//! configured sentinel exactly; it is *kept* when at least one feature
//! differs. [`Masking`] zeroes masked timesteps and publishes a `u8` mask
//! (`1` = keep) of shape `input.dims()[..rank - 1]` for downstream layers.
//!
//! Comparison is exact: values that only approximately equal the sentinel
//! (for example after floating-point arithmetic) are kept. A `NaN` sentinel
//! therefore never masks anything.

use candle_core::{D, DType, Device, Module, Tensor};
use serde_json::Value;

use crate::config::{LayerConfig, MaskingConfig};
use crate::error::{MaskingError, Result};
use crate::layer::{Layer, MaskedTensor, single_input};
use crate::shape::ShapeSpec;

// ---------------------------------------------------------------------------
// Mask computation
// ---------------------------------------------------------------------------

/// `2^63`, the first `f64` above `i64::MAX`.
const I64_UPPER_EXCLUSIVE: f64 = 9_223_372_036_854_775_808.0;

/// Whether `value` is an integer inside the value range of `dtype`.
///
/// Checked before casting: the cast saturates, and `i64::MAX` rounds back
/// to `2^63` in `f64`, so a round trip alone would alias out-of-range
/// sentinels onto the extreme values.
#[allow(clippy::float_cmp)] // exact integrality test
fn integer_sentinel_in_range(dtype: DType, value: f64) -> bool {
    if !value.is_finite() || value.trunc() != value {
        return false;
    }
    match dtype {
        DType::U8 => (0.0..=f64::from(u8::MAX)).contains(&value),
        DType::U32 => (0.0..=f64::from(u32::MAX)).contains(&value),
        DType::I64 => (-I64_UPPER_EXCLUSIVE..I64_UPPER_EXCLUSIVE).contains(&value),
        _ => true,
    }
}

/// Element-wise `input != mask_value` as a `u8` tensor of the input's shape.
///
/// The sentinel is converted to the input dtype first. For integer dtypes a
/// sentinel that is fractional or outside the dtype's range cannot equal any
/// element, so every position differs.
fn differs_from_sentinel(input: &Tensor, mask_value: f64) -> Result<Tensor> {
    let dtype = input.dtype();
    let all_differ = || Tensor::ones(input.dims(), DType::U8, input.device());

    if !dtype.is_float() && !integer_sentinel_in_range(dtype, mask_value) {
        return Ok(all_differ()?);
    }

    // Built on the CPU: not every accelerator supports f64 scalars.
    let sentinel = Tensor::new(mask_value, &Device::Cpu)?.to_dtype(dtype)?;

    if !dtype.is_float() {
        let converted = sentinel.to_dtype(DType::F64)?.to_vec0::<f64>()?;
        #[allow(clippy::float_cmp)] // exact equality is the masking criterion
        let representable = converted == mask_value;
        if !representable {
            return Ok(all_differ()?);
        }
    }

    let sentinel = sentinel.to_device(input.device())?;
    Ok(input.broadcast_ne(&sentinel)?)
}

/// Per-timestep keep mask with the feature axis retained as size 1.
///
/// # Shapes
/// - `input`: `[..., features]`
/// - returns: `[..., 1]`, `u8` (`1` = keep)
///
/// # Errors
///
/// Returns [`MaskingError::ShapeMismatch`] for rank-0 inputs (no feature
/// axis) and [`MaskingError::Model`] on tensor operation failures.
pub fn keep_mask_keepdim(input: &Tensor, mask_value: f64) -> Result<Tensor> {
    let dims = input.dims();
    let Some(&features) = dims.last() else {
        return Err(MaskingError::ShapeMismatch(
            "masking needs at least one axis to reduce over, got a scalar".into(),
        ));
    };

    // OR over an empty feature axis is false. Empty batch or timestep axes
    // have nothing to reduce, and candle rejects empty reductions.
    if features == 0 || input.elem_count() == 0 {
        let mut keep_dims = dims.to_vec();
        if let Some(last) = keep_dims.last_mut() {
            *last = 1;
        }
        return Ok(Tensor::zeros(keep_dims, DType::U8, input.device())?);
    }

    let differs = differs_from_sentinel(input, mask_value)?;
    // Logical OR over {0, 1} values is their maximum.
    Ok(differs.max_keepdim(D::Minus1)?)
}

/// Apply sentinel masking and return `(output, mask)`.
///
/// `output` has the input's shape and dtype with masked timesteps set to
/// zero; `mask` is the published `u8` keep mask with the feature axis
/// squeezed away.
///
/// # Shapes
/// - `input`: `[batch, timesteps, features]` (any rank >= 1)
/// - returns: (`[batch, timesteps, features]`, `[batch, timesteps]`)
///
/// # Errors
///
/// Returns [`MaskingError::ShapeMismatch`] for rank-0 inputs and
/// [`MaskingError::Model`] on tensor operation failures.
pub fn apply_sentinel_mask(input: &Tensor, mask_value: f64) -> Result<(Tensor, Tensor)> {
    let keep = keep_mask_keepdim(input, mask_value)?;
    let mask = keep.squeeze(D::Minus1)?;

    if input.elem_count() == 0 {
        return Ok((input.clone(), mask));
    }

    // Selecting zero instead of multiplying by the cast mask keeps masked rows
    // exactly zero even for infinite sentinels (inf * 0 = NaN).
    let zero = Tensor::zeros((), input.dtype(), input.device())?.broadcast_as(input.dims())?;
    let output = keep.broadcast_as(input.dims())?.where_cond(input, &zero)?;
    Ok((output, mask))
}

// ---------------------------------------------------------------------------
// Masking layer
// ---------------------------------------------------------------------------

/// Masks timesteps whose feature vector equals a sentinel value.
///
/// # Example
///
/// ```
/// use candle_masking::Masking;
/// use candle_core::{Device, Tensor};
///
/// let layer = Masking::new(0.0);
/// let input = Tensor::new(&[[[1f32, 1.], [0., 0.], [1., 0.]]], &Device::Cpu).unwrap();
/// let result = layer.forward(&input).unwrap();
///
/// let mask: Vec<Vec<u8>> = result.mask().unwrap().to_vec2().unwrap();
/// assert_eq!(mask, vec![vec![1, 0, 1]]);
/// assert_eq!(result.output().dims(), input.dims());
/// ```
#[derive(Debug, Clone)]
pub struct Masking {
    /// Sentinel plus generic layer fields; never mutated after construction.
    config: MaskingConfig,
}

impl Masking {
    /// Class identifier used for registry (de)serialization.
    pub const CLASS_NAME: &'static str = "Masking";

    /// Create a masking layer with default generic configuration.
    #[must_use]
    pub fn new(mask_value: f64) -> Self {
        Self::from_config(MaskingConfig::new(mask_value))
    }

    /// Create a masking layer from an explicit configuration.
    #[must_use]
    pub const fn from_config(config: MaskingConfig) -> Self {
        Self { config }
    }

    /// Rebuild a layer from the JSON produced by [`Layer::get_config`].
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::Config`] if the configuration is malformed.
    pub fn from_json(config: &Value) -> Result<Self> {
        Ok(Self::from_config(MaskingConfig::from_json(config)?))
    }

    /// The sentinel value.
    #[must_use]
    pub const fn mask_value(&self) -> f64 {
        self.config.mask_value
    }

    /// Full masking configuration.
    #[must_use]
    pub const fn masking_config(&self) -> &MaskingConfig {
        &self.config
    }

    /// Mask a single tensor.
    ///
    /// # Shapes
    /// - `input`: `[batch, timesteps, features]`
    /// - returns: output `[batch, timesteps, features]`, mask `[batch, timesteps]`
    ///
    /// # Errors
    ///
    /// Returns [`MaskingError::ShapeMismatch`] for rank-0 inputs and
    /// [`MaskingError::Model`] on tensor operation failures.
    pub fn forward(&self, input: &Tensor) -> Result<MaskedTensor> {
        let input = self.config.base.prepare_input(input)?;
        tracing::trace!(
            layer = %self.config.base.name,
            dims = ?input.dims(),
            mask_value = self.config.mask_value,
            "applying sentinel mask",
        );
        let (output, mask) = apply_sentinel_mask(&input, self.config.mask_value)?;
        Ok(MaskedTensor::with_mask(output, mask))
    }

    /// Compute only the published mask, skipping the output.
    ///
    /// # Shapes
    /// - `input`: `[batch, timesteps, features]`
    /// - returns: `[batch, timesteps]`, `u8`
    ///
    /// # Errors
    ///
    /// Same as [`forward`](Self::forward).
    pub fn compute_mask(&self, input: &Tensor) -> Result<Tensor> {
        let input = self.config.base.prepare_input(input)?;
        let keep = keep_mask_keepdim(&input, self.config.mask_value)?;
        Ok(keep.squeeze(D::Minus1)?)
    }
}

impl Layer for Masking {
    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    fn config(&self) -> &LayerConfig {
        &self.config.base
    }

    fn supports_masking(&self) -> bool {
        true
    }

    fn compute_output_shape(&self, input_shape: &ShapeSpec) -> ShapeSpec {
        input_shape.clone()
    }

    /// The incoming mask is ignored: the mask is recomputed from the data.
    fn call(&self, inputs: &[Tensor], _mask: Option<&Tensor>) -> Result<MaskedTensor> {
        let input = single_input(inputs)?;
        self.forward(input)
    }

    fn get_config(&self) -> Value {
        self.config.to_json()
    }
}

/// Plain candle [`Module`] view: returns the masked output and drops the mask.
impl Module for Masking {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match Self::forward(self, xs) {
            Ok(masked) => Ok(masked.into_output()),
            Err(MaskingError::Model(e)) => Err(e),
            Err(other) => Err(candle_core::Error::wrap(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
