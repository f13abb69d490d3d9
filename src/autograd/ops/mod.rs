//! Differentiable operations
//!
//! Currently a single operation: quantized matrix multiplication.

mod matmul;

pub use matmul::matmul;
