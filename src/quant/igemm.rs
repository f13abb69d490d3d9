//! Integer GEMM over quantized operands

use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3};

use crate::error::{MatMulError, Result};
use crate::trace::{TraceStep, TRACER};

/// Longest supported contraction dim: `127 * 127 * k` must stay below
/// `i32::MAX` or the accumulator can overflow.
pub const MAX_CONTRACTION: usize = (i32::MAX / (127 * 127)) as usize;

/// Output shape of `lhs @ rhs`, validating ranks and dimensions.
///
/// Rank-2 and rank-3 operands are accepted; a rank-2 operand broadcasts
/// across its rank-3 partner's batch. Rank-3 pairs must share the batch dim.
pub fn matmul_output_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    if !(2..=3).contains(&lhs.len()) {
        return Err(MatMulError::UnsupportedRank { shape: lhs.to_vec() });
    }
    if !(2..=3).contains(&rhs.len()) {
        return Err(MatMulError::UnsupportedRank { shape: rhs.to_vec() });
    }
    let mismatch = || MatMulError::ShapeMismatch { lhs: lhs.to_vec(), rhs: rhs.to_vec() };

    let (m, lk) = (lhs[lhs.len() - 2], lhs[lhs.len() - 1]);
    let (rk, n) = (rhs[rhs.len() - 2], rhs[rhs.len() - 1]);
    if lk != rk {
        return Err(mismatch());
    }
    match (lhs.len(), rhs.len()) {
        (2, 2) => Ok(vec![m, n]),
        (3, 2) => Ok(vec![lhs[0], m, n]),
        (2, 3) => Ok(vec![rhs[0], m, n]),
        (3, 3) if lhs[0] == rhs[0] => Ok(vec![lhs[0], m, n]),
        _ => Err(mismatch()),
    }
}

/// Batched integer matrix multiply, `i8 x i8 -> i32`.
pub fn igemm(lhs: &ArrayD<i8>, rhs: &ArrayD<i8>) -> Result<ArrayD<i32>> {
    let out_shape = matmul_output_shape(lhs.shape(), rhs.shape())?;
    let k = lhs.shape()[lhs.ndim() - 1];
    if k > MAX_CONTRACTION {
        return Err(MatMulError::AccumulatorOverflow { k, max: MAX_CONTRACTION });
    }

    let a = batched(lhs)?;
    let b = batched(rhs)?;
    let (m, n) = (a.shape()[1], b.shape()[2]);
    let batch = a.shape()[0].max(b.shape()[0]);

    TRACER.start(TraceStep::IntegerGemm);
    let mut out = Array3::<i32>::zeros((batch, m, n));
    for t in 0..batch {
        let at = a.index_axis(Axis(0), t % a.shape()[0]);
        let bt = b.index_axis(Axis(0), t % b.shape()[0]);
        let mut ot = out.index_axis_mut(Axis(0), t);
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0i32;
                for p in 0..k {
                    acc += i32::from(at[(i, p)]) * i32::from(bt[(p, j)]);
                }
                ot[(i, j)] = acc;
            }
        }
    }
    TRACER.end(TraceStep::IntegerGemm, format!("{m}x{k}x{n} batch {batch}"));

    let out = out.into_dyn();
    if out_shape.len() == 2 {
        Ok(out.index_axis_move(Axis(0), 0))
    } else {
        Ok(out)
    }
}

/// View any supported operand as `[batch, rows, cols]`.
fn batched(x: &ArrayD<i8>) -> Result<ArrayView3<'_, i8>> {
    let view = if x.ndim() == 2 { x.view().insert_axis(Axis(0)) } else { x.view() };
    view.into_dimensionality::<Ix3>()
        .map_err(|_| MatMulError::UnsupportedRank { shape: x.shape().to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, arr3};

    #[test]
    fn test_output_shape_rank2() {
        assert_eq!(matmul_output_shape(&[4, 8], &[8, 4]).unwrap(), vec![4, 4]);
    }

    #[test]
    fn test_output_shape_rank3() {
        assert_eq!(matmul_output_shape(&[2, 4, 8], &[2, 8, 3]).unwrap(), vec![2, 4, 3]);
    }

    #[test]
    fn test_output_shape_mixed_rank() {
        assert_eq!(matmul_output_shape(&[2, 4, 8], &[8, 5]).unwrap(), vec![2, 4, 5]);
        assert_eq!(matmul_output_shape(&[4, 8], &[2, 8, 5]).unwrap(), vec![2, 4, 5]);
    }

    #[test]
    fn test_output_shape_inner_dim_mismatch() {
        let err = matmul_output_shape(&[4, 8], &[4, 4]).unwrap_err();
        assert!(matches!(err, MatMulError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_output_shape_batch_mismatch() {
        let err = matmul_output_shape(&[2, 4, 8], &[3, 8, 4]).unwrap_err();
        assert!(matches!(err, MatMulError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_output_shape_bad_rank() {
        assert!(matches!(
            matmul_output_shape(&[8], &[8, 4]).unwrap_err(),
            MatMulError::UnsupportedRank { .. }
        ));
        assert!(matches!(
            matmul_output_shape(&[2, 2], &[1, 2, 2, 2]).unwrap_err(),
            MatMulError::UnsupportedRank { .. }
        ));
    }

    #[test]
    fn test_igemm_rank2_known_values() {
        let a = arr2(&[[1i8, 2], [3, 4]]).into_dyn();
        let b = arr2(&[[5i8, 6], [7, 8]]).into_dyn();
        let c = igemm(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c[[0, 0]], 19);
        assert_eq!(c[[0, 1]], 22);
        assert_eq!(c[[1, 0]], 43);
        assert_eq!(c[[1, 1]], 50);
    }

    #[test]
    fn test_igemm_rank3_batched() {
        let a = arr3(&[[[1i8, 0], [0, 1]], [[2, 0], [0, 2]]]).into_dyn();
        let b = arr3(&[[[1i8, 2], [3, 4]], [[1, 2], [3, 4]]]).into_dyn();
        let c = igemm(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 2, 2]);
        // Batch 0: identity, batch 1: 2 * identity
        assert_eq!(c[[0, 0, 0]], 1);
        assert_eq!(c[[0, 1, 1]], 4);
        assert_eq!(c[[1, 0, 0]], 2);
        assert_eq!(c[[1, 1, 1]], 8);
    }

    #[test]
    fn test_igemm_rank2_rhs_broadcasts_over_batch() {
        let a = arr3(&[[[1i8, 2]], [[3, 4]]]).into_dyn(); // [2, 1, 2]
        let b = arr2(&[[1i8], [1]]).into_dyn(); // [2, 1]
        let c = igemm(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 1, 1]);
        assert_eq!(c[[0, 0, 0]], 3);
        assert_eq!(c[[1, 0, 0]], 7);
    }

    #[test]
    fn test_igemm_rank2_lhs_broadcasts_over_batch() {
        let a = arr2(&[[1i8, 1]]).into_dyn(); // [1, 2]
        let b = arr3(&[[[1i8], [2]], [[3], [4]]]).into_dyn(); // [2, 2, 1]
        let c = igemm(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 1, 1]);
        assert_eq!(c[[0, 0, 0]], 3);
        assert_eq!(c[[1, 0, 0]], 7);
    }

    #[test]
    fn test_igemm_extreme_values_no_overflow() {
        // 127 * 127 * k at the densest supported magnitude
        let a = ArrayD::from_elem(ndarray::IxDyn(&[1, 64]), 127i8);
        let b = ArrayD::from_elem(ndarray::IxDyn(&[64, 1]), 127i8);
        let c = igemm(&a, &b).unwrap();
        assert_eq!(c[[0, 0]], 127 * 127 * 64);
    }

    #[test]
    fn test_igemm_contraction_overflow_guard() {
        let k = MAX_CONTRACTION + 1;
        let a = ArrayD::<i8>::zeros(ndarray::IxDyn(&[1, k]));
        let b = ArrayD::<i8>::zeros(ndarray::IxDyn(&[k, 1]));
        let err = igemm(&a, &b).unwrap_err();
        assert!(matches!(err, MatMulError::AccumulatorOverflow { .. }));
    }

    #[test]
    fn test_igemm_shape_mismatch() {
        let a = arr2(&[[1i8, 2]]).into_dyn();
        let b = arr2(&[[1i8, 2]]).into_dyn();
        assert!(matches!(igemm(&a, &b).unwrap_err(), MatMulError::ShapeMismatch { .. }));
    }
}
