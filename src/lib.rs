//! cuantizar: differentiable 8-bit quantized matrix multiplication
//!
//! Computes `C = A @ B` through vectorwise int8 quantization and an integer
//! GEMM, while exposing mathematically correct gradients for training loops:
//!
//! ```
//! use cuantizar::{backward, matmul, QuantType, Tensor};
//!
//! let a = Tensor::from_shape_vec(&[4, 8], vec![0.5; 32], true);
//! let b = Tensor::from_shape_vec(&[8, 4], vec![0.25; 32], true);
//! let mut c = matmul(&a, &b, QuantType::Vector).unwrap();
//! backward(&mut c, None).unwrap();
//! assert_eq!(a.grad().unwrap().shape(), &[4, 8]);
//! assert_eq!(b.grad().unwrap().shape(), &[8, 4]);
//! ```
//!
//! Rank-2 and rank-3 (batched) operands are supported, including a rank-2
//! operand shared across the batch of its rank-3 partner. Operands are
//! retained for backward only while some gradient actually needs them.

pub mod autograd;
pub mod error;
pub mod quant;
pub mod trace;

pub use autograd::{backward, matmul, BackwardOp, MatMulContext, SavedOperand, Tensor};
pub use error::{MatMulError, Result};
pub use quant::QuantType;
