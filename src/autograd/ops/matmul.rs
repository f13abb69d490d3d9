//! Quantized matrix multiplication with its paired backward rule
//!
//! Forward quantizes both operands to i8, multiplies in integer arithmetic,
//! and rescales with both scale tensors. Backward expresses
//! `dL/dA = grad @ B^T` and `dL/dB = A^T @ grad` as quantized GEMMs,
//! requantizing the retained operands along each gradient GEMM's contraction
//! axes. Instrumented with TRACER for empirical overhead analysis.

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::{ArrayD, Axis};

use crate::autograd::axes::{
    forward_lhs_axes, forward_rhs_axes, grad_lhs_axes, grad_rhs_axes, permuted, transpose_order,
    Rank,
};
use crate::autograd::backward::{BackwardOp, GradEdge};
use crate::autograd::context::{MatMulContext, SavedOperand};
use crate::autograd::Tensor;
use crate::error::{MatMulError, Result};
use crate::quant::{igemm, matmul_output_shape, vectorwise_mm_dequant, vectorwise_quant, QuantType};
use crate::trace::{TraceStep, TRACER};

/// Differentiable quantized matrix multiplication: `C = A @ B`.
///
/// Operands may be rank 2 (`[rows, cols]`) or rank 3 (`[batch, rows, cols]`);
/// a rank-2 operand is shared across its rank-3 partner's batch. Shape and
/// scheme problems surface here, before any arithmetic runs.
///
/// When either operand tracks gradients the result carries a backward node;
/// each operand is retained for backward only if the *other* one requires a
/// gradient, since `dL/dA` consumes `B` and `dL/dB` consumes `A`.
pub fn matmul(lhs: &Tensor, rhs: &Tensor, quant_type: QuantType) -> Result<Tensor> {
    TRACER.span(
        TraceStep::Forward,
        format!("{:?} @ {:?}", lhs.shape(), rhs.shape()),
        || {
            matmul_output_shape(lhs.shape(), rhs.shape())?;
            let lhs_rank = Rank::of(lhs.shape())?;
            let rhs_rank = Rank::of(rhs.shape())?;

            let (q_lhs, s_lhs) =
                vectorwise_quant(lhs.data(), forward_lhs_axes(lhs_rank), quant_type)?;
            let (q_rhs, s_rhs) =
                vectorwise_quant(rhs.data(), forward_rhs_axes(rhs_rank), quant_type)?;
            let acc = igemm(&q_lhs, &q_rhs)?;
            let out = vectorwise_mm_dequant(&acc, &s_lhs, &s_rhs)?;

            let requires_grad = lhs.requires_grad() || rhs.requires_grad();
            let mut result = Tensor::new(out, requires_grad);
            if requires_grad {
                let op = QuantMatMulBackward {
                    ctx: RefCell::new(Some(MatMulContext::capture(lhs, rhs, quant_type))),
                    lhs: GradEdge::to(lhs),
                    rhs: GradEdge::to(rhs),
                    result_grad: result.grad_cell(),
                };
                result.set_backward_op(Rc::new(op));
            }
            Ok(result)
        },
    )
}

impl MatMulContext {
    /// Consume the context, producing `(dL/dA, dL/dB)`.
    ///
    /// Either gradient is `None` when the corresponding operand did not
    /// request one. That is the expected outcome for inference-only calls
    /// still routed through the differentiable operator, never an error.
    pub fn backward(
        self,
        grad_output: &ArrayD<f32>,
    ) -> Result<(Option<ArrayD<f32>>, Option<ArrayD<f32>>)> {
        TRACER.span(TraceStep::Backward, format!("{:?}", grad_output.shape()), || {
            let expected = matmul_output_shape(&self.lhs_shape, &self.rhs_shape)?;
            if grad_output.shape() != expected.as_slice() {
                return Err(MatMulError::ShapeMismatch {
                    lhs: grad_output.shape().to_vec(),
                    rhs: expected,
                });
            }

            let grad_rhs = match &self.saved_lhs {
                SavedOperand::Retained(lhs) => {
                    Some(grad_for_rhs(lhs, grad_output, &self.rhs_shape, self.quant_type)?)
                }
                SavedOperand::NotRetained => None,
            };
            let grad_lhs = match &self.saved_rhs {
                SavedOperand::Retained(rhs) => {
                    Some(grad_for_lhs(rhs, grad_output, &self.lhs_shape, self.quant_type)?)
                }
                SavedOperand::NotRetained => None,
            };
            Ok((grad_lhs, grad_rhs))
        })
    }
}

/// `dL/dB = A^T @ grad_output`.
///
/// Both GEMM inputs quantize along their leading axes (this GEMM contracts
/// over batch and rows), then the retained `A` and its scale tensor are
/// swapped into transposed layout so the contraction dims line up.
fn grad_for_rhs(
    lhs: &ArrayD<f32>,
    grad_output: &ArrayD<f32>,
    rhs_shape: &[usize],
    quant_type: QuantType,
) -> Result<ArrayD<f32>> {
    let grad_rank = Rank::of(grad_output.shape())?;
    let lhs_rank = Rank::of(lhs.shape())?;

    let (q_grad, s_grad) = vectorwise_quant(grad_output, grad_rhs_axes(grad_rank), quant_type)?;
    let (q_lhs, s_lhs) = vectorwise_quant(lhs, grad_rhs_axes(lhs_rank), quant_type)?;

    let order = transpose_order(lhs_rank);
    let acc = igemm(&permuted(&q_lhs, order), &q_grad)?;
    let mut grad = vectorwise_mm_dequant(&acc, &permuted(&s_lhs, order), &s_grad)?;

    // A rank-2 operand shared across a batched partner accumulates its
    // per-batch contributions; the leading-axes scales are batch-uniform, so
    // summing after the rescale is exact.
    if grad.ndim() > rhs_shape.len() {
        grad = grad.sum_axis(Axis(0));
    }
    debug_assert_eq!(grad.shape(), rhs_shape);
    Ok(grad)
}

/// `dL/dA = grad_output @ B^T`.
///
/// Both GEMM inputs quantize along their last axis (this GEMM contracts over
/// the output features), then the retained `B` and its scale tensor are
/// swapped into transposed layout.
fn grad_for_lhs(
    rhs: &ArrayD<f32>,
    grad_output: &ArrayD<f32>,
    lhs_shape: &[usize],
    quant_type: QuantType,
) -> Result<ArrayD<f32>> {
    let grad_rank = Rank::of(grad_output.shape())?;
    let rhs_rank = Rank::of(rhs.shape())?;

    let (q_grad, s_grad) = vectorwise_quant(grad_output, grad_lhs_axes(grad_rank), quant_type)?;
    let (q_rhs, s_rhs) = vectorwise_quant(rhs, grad_lhs_axes(rhs_rank), quant_type)?;

    let order = transpose_order(rhs_rank);
    let acc = igemm(&q_grad, &permuted(&q_rhs, order))?;
    let mut grad = vectorwise_mm_dequant(&acc, &s_grad, &permuted(&s_rhs, order))?;

    if grad.ndim() > lhs_shape.len() {
        grad = grad.sum_axis(Axis(0));
    }
    debug_assert_eq!(grad.shape(), lhs_shape);
    Ok(grad)
}

/// Tape node recorded by [`matmul`].
struct QuantMatMulBackward {
    ctx: RefCell<Option<MatMulContext>>,
    lhs: GradEdge,
    rhs: GradEdge,
    result_grad: Rc<RefCell<Option<ArrayD<f32>>>>,
}

impl BackwardOp for QuantMatMulBackward {
    fn backward(&self) -> Result<()> {
        let grad_output = match self.result_grad.borrow().as_ref() {
            Some(grad) => grad.clone(),
            None => return Ok(()),
        };
        // The context is consumed on the first traversal; revisiting this
        // node is a no-op.
        let Some(ctx) = self.ctx.borrow_mut().take() else {
            return Ok(());
        };

        let (grad_lhs, grad_rhs) = ctx.backward(&grad_output)?;
        if let Some(grad) = grad_lhs {
            self.lhs.accumulate(grad);
        }
        if let Some(grad) = grad_rhs {
            self.rhs.accumulate(grad);
        }

        self.lhs.continue_backward()?;
        self.rhs.continue_backward()
    }
}
