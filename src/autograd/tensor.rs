//! Rank-2/3 tensors with shared gradient storage

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::{ArrayD, IxDyn};

use crate::autograd::BackwardOp;

/// A floating-point tensor of rank 2 (`[rows, cols]`) or rank 3
/// (`[batch, rows, cols]`).
///
/// Data is reference-counted; clones share both the data and the gradient
/// cell, so a gradient accumulated through one handle is visible through all
/// of them.
#[derive(Clone)]
pub struct Tensor {
    data: Rc<ArrayD<f32>>,
    grad: Rc<RefCell<Option<ArrayD<f32>>>>,
    requires_grad: bool,
    backward_op: Option<Rc<dyn BackwardOp>>,
}

impl Tensor {
    /// Wrap an array as a tensor.
    pub fn new(data: ArrayD<f32>, requires_grad: bool) -> Self {
        Self {
            data: Rc::new(data),
            grad: Rc::new(RefCell::new(None)),
            requires_grad,
            backward_op: None,
        }
    }

    /// Build a tensor from a flat value buffer and a shape.
    pub fn from_shape_vec(shape: &[usize], values: Vec<f32>, requires_grad: bool) -> Self {
        assert_eq!(
            values.len(),
            shape.iter().product::<usize>(),
            "value count must match shape"
        );
        let data =
            ArrayD::from_shape_vec(IxDyn(shape), values).expect("shape product already checked");
        Self::new(data, requires_grad)
    }

    /// Borrow the underlying array.
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Shared handle to the underlying array, without copying it.
    pub(crate) fn shared_data(&self) -> Rc<ArrayD<f32>> {
        Rc::clone(&self.data)
    }

    /// Tensor shape.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the tensor has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether a gradient should be computed for this tensor.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Current accumulated gradient, if any.
    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.grad.borrow().clone()
    }

    /// Replace the gradient.
    pub fn set_grad(&self, grad: ArrayD<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Drop the accumulated gradient, for reuse across training steps.
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Add into the gradient, initializing it on first use.
    pub fn accumulate_grad(&self, grad: ArrayD<f32>) {
        accumulate_into(&self.grad, grad);
    }

    /// Shared handle to the gradient cell.
    pub fn grad_cell(&self) -> Rc<RefCell<Option<ArrayD<f32>>>> {
        Rc::clone(&self.grad)
    }

    /// Attach the backward node that produced this tensor.
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }

    /// The backward node that produced this tensor, if it tracks gradients.
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.data.shape())
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.borrow().is_some())
            .field("has_backward_op", &self.backward_op.is_some())
            .finish()
    }
}

/// Accumulate `grad` into a gradient cell, initializing it on first use.
pub(crate) fn accumulate_into(cell: &RefCell<Option<ArrayD<f32>>>, grad: ArrayD<f32>) {
    let mut slot = cell.borrow_mut();
    match slot.as_mut() {
        Some(existing) => *existing += &grad,
        None => *slot = Some(grad),
    }
}
