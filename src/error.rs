//! Errors surfaced by the quantized matmul operator and its numeric primitives

use thiserror::Error;

/// Errors from the quantized matmul pipeline.
///
/// Shape and scheme problems are reported from the forward call; primitive
/// failures (non-finite data, accumulator overflow) propagate unmodified from
/// whichever pass triggered them. An absent gradient is never an error.
#[derive(Error, Debug)]
pub enum MatMulError {
    #[error("tensor of shape {shape:?} is not supported: expected rank 2 or 3")]
    UnsupportedRank { shape: Vec<usize> },

    #[error("shape mismatch: cannot multiply {lhs:?} by {rhs:?}")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("unsupported quantization scheme: {0:?}")]
    UnsupportedScheme(String),

    #[error("cannot quantize a tensor containing non-finite values")]
    NonFiniteInput,

    #[error("contraction dim {k} overflows the i32 accumulator (max {max})")]
    AccumulatorOverflow { k: usize, max: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MatMulError>;
