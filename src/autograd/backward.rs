//! Backward-pass plumbing: the node trait and gradient accumulation edges

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::ArrayD;

use crate::autograd::tensor::{accumulate_into, Tensor};
use crate::error::Result;

/// One node of the reverse pass.
///
/// Implementations read their output's gradient cell, compute input
/// gradients, deposit them through [`GradEdge`]s, and continue upstream.
/// Primitive failures (non-finite gradients, overflow) propagate out of the
/// whole traversal unmodified.
pub trait BackwardOp {
    fn backward(&self) -> Result<()>;
}

/// Accumulation edge for one operand of an operation.
///
/// Carries the operand's gradient cell, upstream node, and requires-grad
/// flag, but none of its data: what data survives until backward is decided
/// solely by the operation's retention policy.
pub struct GradEdge {
    grad: Rc<RefCell<Option<ArrayD<f32>>>>,
    prev: Option<Rc<dyn BackwardOp>>,
    requires_grad: bool,
}

impl GradEdge {
    /// Edge pointing at `tensor`'s gradient cell and producer.
    pub fn to(tensor: &Tensor) -> Self {
        Self {
            grad: tensor.grad_cell(),
            prev: tensor.backward_op(),
            requires_grad: tensor.requires_grad(),
        }
    }

    /// Add into the operand's gradient. Ignored when the operand does not
    /// track gradients.
    pub fn accumulate(&self, grad: ArrayD<f32>) {
        if !self.requires_grad {
            return;
        }
        accumulate_into(&self.grad, grad);
    }

    /// Recurse into the operand's own producer, if it has one.
    pub fn continue_backward(&self) -> Result<()> {
        match &self.prev {
            Some(op) => op.backward(),
            None => Ok(()),
        }
    }
}
