// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pad a ragged batch, mask the padding, and mean-pool only real timesteps.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example pad_mask
//! ```
//!
//! **What it does:**
//!
//! 1. Initialises a tracing subscriber (per-layer debug logs go to stderr).
//! 2. Pads three sequences of different lengths with `-1.0` rows.
//! 3. Runs a [`Sequential`] of [`Masking`] followed by a mask-aware mean pool.
//! 4. Prints the published mask and the pooled features per sequence.

use candle_core::{D, Device, Tensor};
use candle_masking::{
    Layer, LayerConfig, LayerRegistry, MaskedTensor, Masking, Sequential, ShapeSpec,
    single_input,
};
use serde_json::Value;

/// Padding sentinel: no real feature vector is all `-1`.
const PAD: f32 = -1.0;

/// Mean over kept timesteps, `[batch, timesteps, features]` to `[batch, features]`.
struct MeanPool {
    /// Generic layer fields.
    config: LayerConfig,
}

impl Layer for MeanPool {
    fn class_name(&self) -> &'static str {
        "MeanPool"
    }

    fn config(&self) -> &LayerConfig {
        &self.config
    }

    fn supports_masking(&self) -> bool {
        true
    }

    fn compute_output_shape(&self, input_shape: &ShapeSpec) -> ShapeSpec {
        match input_shape {
            ShapeSpec::Single(dims) => {
                let mut dims = dims.clone();
                if dims.len() >= 2 {
                    dims.remove(dims.len() - 2);
                }
                ShapeSpec::Single(dims)
            }
            other => other.clone(),
        }
    }

    fn call(
        &self,
        inputs: &[Tensor],
        mask: Option<&Tensor>,
    ) -> candle_masking::Result<MaskedTensor> {
        let input = single_input(inputs)?;
        let (batch, timesteps, _) = input.dims3()?;
        let weights = match mask {
            Some(mask) => mask.to_dtype(input.dtype())?,
            None => Tensor::ones((batch, timesteps), input.dtype(), input.device())?,
        }
        .unsqueeze(D::Minus1)?;

        let total = input.broadcast_mul(&weights)?.sum(1)?;
        // Clamp the count so an all-padding sequence pools to zeros.
        let count = weights.sum(1)?.clamp(1f32, f32::MAX)?;
        Ok(MaskedTensor::new(total.broadcast_div(&count)?))
    }

    fn get_config(&self) -> Value {
        Value::Object(self.config.to_json())
    }
}

/// Right-pad `sequences` with `PAD` rows into `[batch, max_len, features]`.
fn pad_batch(sequences: &[Vec<[f32; 2]>]) -> candle_masking::Result<Tensor> {
    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut data = Vec::with_capacity(sequences.len() * max_len * 2);
    for sequence in sequences {
        for row in sequence {
            data.extend_from_slice(row);
        }
        for _ in sequence.len()..max_len {
            data.extend_from_slice(&[PAD, PAD]);
        }
    }
    Ok(Tensor::from_vec(data, (sequences.len(), max_len, 2), &Device::Cpu)?)
}

fn main() -> candle_masking::Result<()> {
    // 1. Tracing subscriber; set RUST_LOG=debug to see each layer.
    tracing_subscriber::fmt::init();

    // 2. Ragged batch. The second sequence has a genuine -1 feature that must
    //    not be treated as padding because its other feature differs.
    let sequences = vec![
        vec![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
        vec![[-1.0, 8.0]],
        vec![[2.0, 2.0], [4.0, 0.0]],
    ];
    let input = pad_batch(&sequences)?;
    println!("input dims: {:?}", input.dims());

    // 3. Masking, then pooling over kept timesteps only.
    let mut model = Sequential::new();
    model.push(Masking::new(f64::from(PAD))).push(MeanPool {
        config: LayerConfig::new("mean_pool"),
    });

    let shape = ShapeSpec::from(input.dims());
    println!("output shape: {}", model.compute_output_shape(&shape));

    let mask = Masking::new(f64::from(PAD)).compute_mask(&input)?;
    let result = model.forward(&input)?;

    // 4. Report.
    let mask: Vec<Vec<u8>> = mask.to_vec2()?;
    let pooled: Vec<Vec<f32>> = result.output().to_vec2()?;
    for (i, (keep, features)) in mask.iter().zip(&pooled).enumerate() {
        println!("sequence {i}: mask {keep:?} -> pooled {features:?}");
    }

    // The stack serializes through the registry envelope format.
    let config = model.get_config()?;
    let registry = LayerRegistry::with_builtins();
    println!(
        "masking layer config: {}",
        registry.deserialize(&config["layers"][0])?.get_config()
    );

    Ok(())
}
