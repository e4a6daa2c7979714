// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for candle-masking.

/// Errors that can occur while building, calling, or (de)serializing layers.
#[derive(Debug, thiserror::Error)]
pub enum MaskingError {
    /// Tensor operation failure (wraps candle).
    #[error("tensor error: {0}")]
    Model(#[from] candle_core::Error),

    /// A single-input layer was called with a different number of tensors.
    #[error("expected exactly one input tensor, got {count}")]
    MultipleInputs {
        /// Number of tensors actually supplied.
        count: usize,
    },

    /// The input cannot be reduced over a feature axis.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Layer configuration parsing error.
    #[error("config error: {0}")]
    Config(String),

    /// Unknown or duplicate class name, or a malformed serialized layer.
    #[error("registry error: {0}")]
    Registry(String),

    /// A mask was propagated into a layer that does not declare mask support.
    #[error("layer `{layer}` does not support masking but was passed an input mask")]
    MaskNotSupported {
        /// Name of the offending layer.
        layer: String,
    },
}

/// Result type alias for candle-masking operations.
pub type Result<T> = std::result::Result<T, MaskingError>;
