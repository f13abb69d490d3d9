//! Quantization scheme selector

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MatMulError;

/// Quantization scheme applied to a matmul operand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    /// One scale per reduction slice (row/column). Lower error for tensors
    /// with non-uniform value ranges.
    #[default]
    Vector,
    /// A single scale for the whole tensor.
    Linear,
}

impl FromStr for QuantType {
    type Err = MatMulError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(QuantType::Vector),
            "linear" => Ok(QuantType::Linear),
            other => Err(MatMulError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for QuantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantType::Vector => write!(f, "vector"),
            QuantType::Linear => write!(f, "linear"),
        }
    }
}
