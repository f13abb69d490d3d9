//! Forward-to-backward state for a single quantized matmul call

use std::rc::Rc;

use ndarray::ArrayD;

use crate::autograd::Tensor;
use crate::quant::QuantType;

/// What the forward pass kept for one operand.
///
/// An explicit tag, not a nullable slot: backward pattern-matches on it, and
/// `NotRetained` is a normal outcome, not a missing value.
pub enum SavedOperand {
    Retained(Rc<ArrayD<f32>>),
    NotRetained,
}

impl SavedOperand {
    fn retain_if(needed: bool, tensor: &Tensor) -> Self {
        if needed {
            SavedOperand::Retained(tensor.shared_data())
        } else {
            SavedOperand::NotRetained
        }
    }

    /// The retained data, if any.
    pub fn data(&self) -> Option<&ArrayD<f32>> {
        match self {
            SavedOperand::Retained(data) => Some(data),
            SavedOperand::NotRetained => None,
        }
    }

    pub fn is_retained(&self) -> bool {
        matches!(self, SavedOperand::Retained(_))
    }
}

/// State carried from a forward call to its backward pass.
///
/// Created at forward entry and consumed exactly once: `backward` takes the
/// context by value. Backward requantizes from the raw retained tensors
/// rather than caching quantized intermediates, so a call whose operands need
/// no gradients holds on to nothing at all.
pub struct MatMulContext {
    pub(crate) saved_lhs: SavedOperand,
    pub(crate) saved_rhs: SavedOperand,
    pub(crate) lhs_shape: Vec<usize>,
    pub(crate) rhs_shape: Vec<usize>,
    pub(crate) quant_type: QuantType,
}

impl MatMulContext {
    /// Apply the retention policy for a forward call over `lhs @ rhs`.
    ///
    /// `dL/dB` consumes `A` and `dL/dA` consumes `B`, so each operand is kept
    /// only when the *other* one's gradient will be requested.
    pub fn capture(lhs: &Tensor, rhs: &Tensor, quant_type: QuantType) -> Self {
        Self {
            saved_lhs: SavedOperand::retain_if(rhs.requires_grad(), lhs),
            saved_rhs: SavedOperand::retain_if(lhs.requires_grad(), rhs),
            lhs_shape: lhs.shape().to_vec(),
            rhs_shape: rhs.shape().to_vec(),
            quant_type,
        }
    }

    /// Whether the left operand was kept (i.e. `dL/dB` will be produced).
    pub fn is_lhs_retained(&self) -> bool {
        self.saved_lhs.is_retained()
    }

    /// Whether the right operand was kept (i.e. `dL/dA` will be produced).
    pub fn is_rhs_retained(&self) -> bool {
        self.saved_rhs.is_retained()
    }

    /// Quantization scheme recorded at forward time.
    pub fn quant_type(&self) -> QuantType {
        self.quant_type
    }
}
