// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symbolic shape descriptors for shape inference.
//!
//! A [`ShapeSpec`] describes the shape a layer will see before any tensor
//! exists, so unknown dimensions (typically the batch axis) are `None`.

use std::fmt;

/// Shape descriptor with optional (unknown) dimensions.
///
/// # Example
///
/// ```
/// use candle_masking::ShapeSpec;
///
/// let shape = ShapeSpec::Single(vec![None, Some(10), Some(4)]);
/// assert_eq!(shape.to_string(), "[None, 10, 4]");
/// assert!(shape.is_compatible_with(&[32, 10, 4]));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShapeSpec {
    /// Shape of a single tensor.
    Single(Vec<Option<usize>>),
    /// Shapes of several parallel input tensors.
    Multiple(Vec<Vec<Option<usize>>>),
}

impl ShapeSpec {
    /// Build a fully known single shape from concrete dimensions.
    #[must_use]
    pub fn from_dims(dims: &[usize]) -> Self {
        Self::Single(dims.iter().copied().map(Some).collect())
    }

    /// Rank of a single shape, `None` for [`ShapeSpec::Multiple`].
    #[must_use]
    pub fn rank(&self) -> Option<usize> {
        match self {
            Self::Single(dims) => Some(dims.len()),
            Self::Multiple(_) => None,
        }
    }

    /// Whether concrete `dims` fit this (single) shape.
    ///
    /// Unknown dimensions match anything; a [`ShapeSpec::Multiple`] never
    /// matches a single tensor.
    #[must_use]
    pub fn is_compatible_with(&self, dims: &[usize]) -> bool {
        match self {
            Self::Single(spec) => {
                spec.len() == dims.len()
                    && spec
                        .iter()
                        .zip(dims)
                        .all(|(expected, actual)| expected.is_none_or(|e| e == *actual))
            }
            Self::Multiple(_) => false,
        }
    }
}

/// Write one dimension list as `[None, 10, 4]`.
fn write_dims(f: &mut fmt::Formatter<'_>, dims: &[Option<usize>]) -> fmt::Result {
    write!(f, "[")?;
    for (i, dim) in dims.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match dim {
            Some(d) => write!(f, "{d}")?,
            None => write!(f, "None")?,
        }
    }
    write!(f, "]")
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(dims) => write_dims(f, dims),
            Self::Multiple(shapes) => {
                write!(f, "[")?;
                for (i, dims) in shapes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_dims(f, dims)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&[usize]> for ShapeSpec {
    fn from(dims: &[usize]) -> Self {
        Self::from_dims(dims)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
