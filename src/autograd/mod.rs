//! Tape-based autograd for quantized matrix multiplication
//!
//! Each [`matmul`] call records a backward node on its output; running
//! [`backward()`] on a result seeds its gradient and walks the recorded nodes,
//! accumulating `dL/dA` and `dL/dB` into the operand tensors that asked for
//! them.

pub mod axes;
mod backward;
mod context;
mod ops;
mod tensor;

#[cfg(test)]
mod tests;

pub use backward::{BackwardOp, GradEdge};
pub use context::{MatMulContext, SavedOperand};
pub use ops::matmul;
pub use tensor::Tensor;

use crate::error::Result;

/// Perform a backward pass from `tensor`.
///
/// With no explicit `grad_output` the gradient is seeded with ones, the usual
/// convention for a scalar-reduced loss.
pub fn backward(tensor: &mut Tensor, grad_output: Option<ndarray::ArrayD<f32>>) -> Result<()> {
    match grad_output {
        Some(grad) => tensor.set_grad(grad),
        None => tensor.set_grad(ndarray::ArrayD::ones(tensor.data().raw_dim())),
    }

    if let Some(op) = tensor.backward_op() {
        op.backward()?;
    }
    Ok(())
}
