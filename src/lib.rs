// SPDX-License-Identifier: MIT OR Apache-2.0

//! # candle-masking
//!
//! Sentinel-value timestep masking for sequence models, built on
//! [candle](https://github.com/huggingface/candle).
//!
//! [`Masking`] marks a timestep as padding when *every* feature at that
//! timestep equals a configured sentinel, zeroes those timesteps, and
//! publishes a per-timestep `u8` mask (`1` = keep) alongside the output so
//! downstream layers (attention, recurrence, loss) can skip them.
//!
//! ## Building blocks
//!
//! - [`Layer`]: capability trait (config, shape inference, forward,
//!   mask support) that layers implement.
//! - [`MaskedTensor`]: the `(output, mask)` pair every forward call returns.
//! - [`LayerRegistry`]: class-name registry for JSON (de)serialization.
//! - [`Sequential`]: layer stack that threads masks into mask-aware layers.
//!
//! ## Quick start
//!
//! ```
//! use candle_masking::Masking;
//! use candle_core::{Device, Tensor};
//!
//! // One sequence, three timesteps, two features; row 1 is padding.
//! let input = Tensor::new(&[[[1f32, 1.], [0., 0.], [1., 0.]]], &Device::Cpu)?;
//! let result = Masking::new(0.0).forward(&input)?;
//!
//! assert_eq!(result.mask().unwrap().to_vec2::<u8>()?, vec![vec![1, 0, 1]]);
//! # Ok::<(), candle_masking::MaskingError>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod layer;
pub mod masking;
pub mod registry;
pub mod sequential;
pub mod shape;

pub use config::{LayerConfig, MaskingConfig};
pub use error::{MaskingError, Result};
pub use layer::{Layer, MaskedTensor, single_input};
pub use masking::{Masking, apply_sentinel_mask, keep_mask_keepdim};
pub use registry::{LayerFactory, LayerRegistry};
pub use sequential::Sequential;
pub use shape::ShapeSpec;
