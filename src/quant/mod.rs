//! Quantization primitives: vectorwise quant/dequant and integer GEMM
//!
//! The numeric collaborators of the differentiable matmul operator:
//! - Vectorwise 8-bit quantization (one scale per reduction slice)
//! - Integer GEMM (`i8 x i8 -> i32` with batched broadcast)
//! - Dequantization rescale combining both operand scale tensors
//!
//! The autograd layer only orchestrates these; all integer arithmetic lives
//! here.

mod igemm;
mod types;
mod vectorwise;

pub use igemm::{igemm, matmul_output_shape, MAX_CONTRACTION};
pub use types::QuantType;
pub use vectorwise::{vectorwise_dequant, vectorwise_mm_dequant, vectorwise_quant};
