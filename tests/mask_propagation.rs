// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mask propagation through [`Sequential`] with mask-aware and mask-unaware
//! downstream layers.
//!
//! The layers defined here are small test fixtures: a timestep-preserving
//! `Scale` that forwards its mask, a `Passthrough` that cannot accept one,
//! and a `MaskedMeanPool` that consumes the mask.
//!
//! Run:
//!   `cargo test --test mask_propagation`

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::missing_docs_in_private_items,
    clippy::missing_panics_doc,
    clippy::unnecessary_wraps,
    missing_docs
)]

use candle_core::{D, DType, Device, Tensor};
use candle_masking::{
    Layer, LayerConfig, LayerRegistry, MaskedTensor, Masking, MaskingError, Result, Sequential,
    ShapeSpec, single_input,
};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Fixture layers
// ---------------------------------------------------------------------------

/// Multiplies every element by a constant and forwards the incoming mask.
struct Scale {
    config: LayerConfig,
    factor: f64,
}

impl Scale {
    fn new(factor: f64) -> Self {
        Self {
            config: LayerConfig::new("scale"),
            factor,
        }
    }
}

impl Layer for Scale {
    fn class_name(&self) -> &'static str {
        "Scale"
    }

    fn config(&self) -> &LayerConfig {
        &self.config
    }

    fn supports_masking(&self) -> bool {
        true
    }

    fn compute_output_shape(&self, input_shape: &ShapeSpec) -> ShapeSpec {
        input_shape.clone()
    }

    fn call(&self, inputs: &[Tensor], mask: Option<&Tensor>) -> Result<MaskedTensor> {
        let output = single_input(inputs)?.affine(self.factor, 0.0)?;
        Ok(MaskedTensor::from_parts(output, mask.cloned()))
    }

    fn get_config(&self) -> Value {
        let mut map = self.config.to_json();
        map.insert("factor".into(), serde_json::json!(self.factor));
        Value::Object(map)
    }
}

fn scale_factory(config: &Value) -> Result<Box<dyn Layer>> {
    let base = LayerConfig::from_json(config, "scale")?;
    let factor = config
        .get("factor")
        .and_then(Value::as_f64)
        .ok_or_else(|| MaskingError::Config("missing 'factor'".into()))?;
    Ok(Box::new(Scale {
        config: base,
        factor,
    }))
}

/// Identity layer that does not declare mask support.
struct Passthrough {
    config: LayerConfig,
}

impl Layer for Passthrough {
    fn class_name(&self) -> &'static str {
        "Passthrough"
    }

    fn config(&self) -> &LayerConfig {
        &self.config
    }

    fn compute_output_shape(&self, input_shape: &ShapeSpec) -> ShapeSpec {
        input_shape.clone()
    }

    fn call(&self, inputs: &[Tensor], _mask: Option<&Tensor>) -> Result<MaskedTensor> {
        Ok(MaskedTensor::new(single_input(inputs)?.clone()))
    }

    fn get_config(&self) -> Value {
        Value::Object(self.config.to_json())
    }
}

/// Mean over unmasked timesteps: `[batch, timesteps, features]` to
/// `[batch, features]`. Consumes the mask.
struct MaskedMeanPool {
    config: LayerConfig,
}

impl Layer for MaskedMeanPool {
    fn class_name(&self) -> &'static str {
        "MaskedMeanPool"
    }

    fn config(&self) -> &LayerConfig {
        &self.config
    }

    fn supports_masking(&self) -> bool {
        true
    }

    fn compute_output_shape(&self, input_shape: &ShapeSpec) -> ShapeSpec {
        match input_shape {
            ShapeSpec::Single(dims) if dims.len() == 3 => {
                ShapeSpec::Single(vec![dims[0], dims[2]])
            }
            other => other.clone(),
        }
    }

    fn call(&self, inputs: &[Tensor], mask: Option<&Tensor>) -> Result<MaskedTensor> {
        let input = single_input(inputs)?;
        let (batch, timesteps, _) = input.dims3()?;
        let weights = match mask {
            Some(mask) => mask.to_dtype(input.dtype())?,
            None => Tensor::ones((batch, timesteps), input.dtype(), input.device())?,
        }
        .unsqueeze(D::Minus1)?;

        let total = input.broadcast_mul(&weights)?.sum(1)?;
        let count = weights.sum(1)?;
        Ok(MaskedTensor::new(total.broadcast_div(&count)?))
    }

    fn get_config(&self) -> Value {
        Value::Object(self.config.to_json())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Two sequences, three timesteps, two features. Padding rows are all zero.
fn padded_batch() -> Tensor {
    Tensor::new(
        &[
            [[1f32, 2.], [0., 0.], [3., 4.]],
            [[5., 6.], [7., 8.], [0., 0.]],
        ],
        &Device::Cpu,
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn mask_reaches_mask_aware_layer() {
    let mut model = Sequential::new();
    model.push(Masking::new(0.0)).push(Scale::new(2.0));

    let result = model.forward(&padded_batch()).unwrap();

    let mask: Vec<Vec<u8>> = result.mask().unwrap().to_vec2().unwrap();
    assert_eq!(mask, vec![vec![1, 0, 1], vec![1, 1, 0]]);

    let output: Vec<Vec<Vec<f32>>> = result.output().to_vec3().unwrap();
    assert_eq!(output[0], vec![vec![2., 4.], vec![0., 0.], vec![6., 8.]]);
    assert_eq!(output[1], vec![vec![10., 12.], vec![14., 16.], vec![0., 0.]]);
}

#[test]
fn mask_into_unaware_layer_is_an_error() {
    let mut model = Sequential::new();
    model.push(Masking::new(0.0)).push(Passthrough {
        config: LayerConfig::new("dense_stub"),
    });

    let err = model.forward(&padded_batch()).unwrap_err();
    assert!(
        matches!(&err, MaskingError::MaskNotSupported { layer } if layer == "dense_stub"),
        "unexpected error: {err}"
    );
}

#[test]
fn unaware_layer_before_masking_is_fine() {
    let mut model = Sequential::new();
    model
        .push(Passthrough {
            config: LayerConfig::new("embed_stub"),
        })
        .push(Masking::new(0.0));

    let result = model.forward(&padded_batch()).unwrap();
    assert_eq!(
        result.mask().unwrap().to_vec2::<u8>().unwrap(),
        vec![vec![1, 0, 1], vec![1, 1, 0]]
    );
}

#[test]
fn pooling_consumes_mask() {
    let mut model = Sequential::new();
    model
        .push(Masking::new(0.0))
        .push(MaskedMeanPool {
            config: LayerConfig::new("pool"),
        })
        .push(Passthrough {
            config: LayerConfig::new("head_stub"),
        });

    let result = model.forward(&padded_batch()).unwrap();
    assert!(result.mask().is_none());

    // Padding rows are excluded from the mean.
    let pooled: Vec<Vec<f32>> = result.output().to_vec2().unwrap();
    assert_eq!(pooled, vec![vec![2., 3.], vec![6., 7.]]);

    let shape = ShapeSpec::Single(vec![None, Some(3), Some(2)]);
    assert_eq!(
        model.compute_output_shape(&shape),
        ShapeSpec::Single(vec![None, Some(2)])
    );
}

#[test]
fn second_masking_layer_recomputes_mask() {
    let mut model = Sequential::new();
    model
        .push(Masking::new(0.0))
        .push(Scale::new(1.0))
        .push(Masking::new(7.0));

    // The second layer keeps the zero rows (they differ from 7) and masks
    // nothing else, since no row is all sevens.
    let result = model.forward(&padded_batch()).unwrap();
    assert_eq!(
        result.mask().unwrap().to_vec2::<u8>().unwrap(),
        vec![vec![1, 1, 1], vec![1, 1, 1]]
    );
}

#[test]
fn attention_bias_from_mask_zeroes_padded_keys() {
    let masked = Masking::new(0.0).forward(&padded_batch()).unwrap();
    let mask = masked.mask().unwrap();

    // Additive bias: 0 for kept keys, -inf for padded ones.
    let zeros = Tensor::zeros(mask.dims(), DType::F32, &Device::Cpu).unwrap();
    let neg_inf = Tensor::full(f32::NEG_INFINITY, mask.dims(), &Device::Cpu).unwrap();
    let bias = mask.where_cond(&zeros, &neg_inf).unwrap();

    let scores = Tensor::new(&[[0.5f32, 3.0, 0.5], [1.0, 1.0, 9.0]], &Device::Cpu).unwrap();
    let weights = candle_nn::ops::softmax_last_dim(&(scores + bias).unwrap()).unwrap();
    let weights: Vec<Vec<f32>> = weights.to_vec2().unwrap();

    assert_eq!(weights[0][1], 0.0);
    assert_eq!(weights[1][2], 0.0);
    assert!((weights[0][0] - 0.5).abs() < 1e-6);
    assert!((weights[1][0] - 0.5).abs() < 1e-6);
}

#[test]
fn custom_layers_round_trip_through_registry() {
    let mut registry = LayerRegistry::with_builtins();
    registry.register("Scale", scale_factory).unwrap();

    let mut model = Sequential::new();
    model.push(Masking::new(-1.0)).push(Scale::new(0.5));
    let config = model.get_config().unwrap();

    let rebuilt = Sequential::from_config(&config, &registry).unwrap();
    assert_eq!(rebuilt.len(), 2);
    assert_eq!(rebuilt.get_config().unwrap(), config);

    let input = padded_batch();
    let a = model.forward(&input).unwrap();
    let b = rebuilt.forward(&input).unwrap();
    assert_eq!(
        a.output().to_vec3::<f32>().unwrap(),
        b.output().to_vec3::<f32>().unwrap()
    );

    // Without the custom factory the stack cannot be rebuilt.
    let err = Sequential::from_config(&config, &LayerRegistry::with_builtins()).unwrap_err();
    assert!(matches!(err, MaskingError::Registry(_)));
}
