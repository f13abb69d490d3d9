//! Vectorwise 8-bit quantization and the paired dequantization rescale

use ndarray::{ArrayD, Dimension, IxDyn};

use crate::error::{MatMulError, Result};
use crate::quant::QuantType;
use crate::trace::{TraceStep, TRACER};

/// Largest representable quantized magnitude.
const QMAX: f32 = 127.0;

/// Quantize `x` to i8 along `axes`, returning the integer tensor and a
/// per-slice scale tensor.
///
/// The scale tensor keeps `x`'s rank with each reduction axis collapsed to 1,
/// so it broadcasts against any GEMM result built from `x`. Scales are the
/// per-slice max-abs; values map as `round(x * 127 / scale)` into
/// `[-127, 127]`. [`QuantType::Linear`] ignores `axes` and reduces over the
/// whole tensor instead.
pub fn vectorwise_quant(
    x: &ArrayD<f32>,
    axes: &[usize],
    quant_type: QuantType,
) -> Result<(ArrayD<i8>, ArrayD<f32>)> {
    TRACER.span(TraceStep::Quantize, format!("{:?}", x.shape()), || match quant_type {
        QuantType::Vector => quant_along(x, axes),
        QuantType::Linear => {
            let all: Vec<usize> = (0..x.ndim()).collect();
            quant_along(x, &all)
        }
    })
}

fn quant_along(x: &ArrayD<f32>, axes: &[usize]) -> Result<(ArrayD<i8>, ArrayD<f32>)> {
    let mut scale_shape = x.shape().to_vec();
    for &ax in axes {
        scale_shape[ax] = 1;
    }

    let mut scales = ArrayD::<f32>::zeros(IxDyn(&scale_shape));
    let mut slice_idx = vec![0usize; x.ndim()];
    for (idx, &v) in x.indexed_iter() {
        if !v.is_finite() {
            return Err(MatMulError::NonFiniteInput);
        }
        slice_idx.copy_from_slice(idx.slice());
        for &ax in axes {
            slice_idx[ax] = 0;
        }
        let s = &mut scales[&slice_idx[..]];
        *s = s.max(v.abs());
    }

    let mut q = ArrayD::<i8>::zeros(x.raw_dim());
    for (idx, &v) in x.indexed_iter() {
        slice_idx.copy_from_slice(idx.slice());
        for &ax in axes {
            slice_idx[ax] = 0;
        }
        let s = scales[&slice_idx[..]];
        // An all-zero slice keeps scale 0 and quantizes to zeros.
        if s > 0.0 {
            q[idx] = (v * QMAX / s).round().clamp(-QMAX, QMAX) as i8;
        }
    }

    Ok((q, scales))
}

/// Reconstruct an approximate f32 tensor from quantized data and its scales.
pub fn vectorwise_dequant(q: &ArrayD<i8>, scales: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    let s = scales.broadcast(q.raw_dim()).ok_or_else(|| MatMulError::ShapeMismatch {
        lhs: q.shape().to_vec(),
        rhs: scales.shape().to_vec(),
    })?;
    let mut out = q.mapv(f32::from);
    out *= &s;
    out /= QMAX;
    Ok(out)
}

/// Rescale an integer GEMM accumulator back to f32 using both operand scale
/// tensors. The vector and linear schemes share this rescale.
pub fn vectorwise_mm_dequant(
    acc: &ArrayD<i32>,
    s_lhs: &ArrayD<f32>,
    s_rhs: &ArrayD<f32>,
) -> Result<ArrayD<f32>> {
    TRACER.span(TraceStep::Dequantize, format!("{:?}", acc.shape()), || {
        let sl = s_lhs.broadcast(acc.raw_dim()).ok_or_else(|| MatMulError::ShapeMismatch {
            lhs: s_lhs.shape().to_vec(),
            rhs: acc.shape().to_vec(),
        })?;
        let sr = s_rhs.broadcast(acc.raw_dim()).ok_or_else(|| MatMulError::ShapeMismatch {
            lhs: s_rhs.shape().to_vec(),
            rhs: acc.shape().to_vec(),
        })?;
        let mut out = acc.mapv(|v| v as f32);
        out *= &sl;
        out *= &sr;
        out /= QMAX * QMAX;
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, arr3};

    #[test]
    fn test_quant_known_values() {
        // Row amax = 4.0, so q = round(v * 127 / 4)
        let x = arr2(&[[1.0f32, -2.0, 3.0, 4.0]]).into_dyn();
        let (q, s) = vectorwise_quant(&x, &[1], QuantType::Vector).unwrap();
        assert_eq!(s.shape(), &[1, 1]);
        assert_abs_diff_eq!(s[[0, 0]], 4.0);
        assert_eq!(q[[0, 0]], 32);
        assert_eq!(q[[0, 1]], -64);
        assert_eq!(q[[0, 2]], 95);
        assert_eq!(q[[0, 3]], 127);
    }

    #[test]
    fn test_scale_shape_keepdim_rank2() {
        let x = arr2(&[[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn();
        let (_, s_rows) = vectorwise_quant(&x, &[1], QuantType::Vector).unwrap();
        assert_eq!(s_rows.shape(), &[3, 1]);
        let (_, s_cols) = vectorwise_quant(&x, &[0], QuantType::Vector).unwrap();
        assert_eq!(s_cols.shape(), &[1, 2]);
    }

    #[test]
    fn test_scale_shape_keepdim_rank3() {
        let x = arr3(&[[[1.0f32, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]]).into_dyn();
        let (_, s) = vectorwise_quant(&x, &[0, 1], QuantType::Vector).unwrap();
        assert_eq!(s.shape(), &[1, 1, 2]);
        // Column amax across both batch and rows
        assert_abs_diff_eq!(s[[0, 0, 0]], 7.0);
        assert_abs_diff_eq!(s[[0, 0, 1]], 8.0);
    }

    #[test]
    fn test_linear_scheme_single_scale() {
        let x = arr2(&[[1.0f32, -9.0], [3.0, 4.0]]).into_dyn();
        let (q, s) = vectorwise_quant(&x, &[1], QuantType::Linear).unwrap();
        assert_eq!(s.shape(), &[1, 1]);
        assert_abs_diff_eq!(s[[0, 0]], 9.0);
        assert_eq!(q[[0, 1]], -127);
    }

    #[test]
    fn test_roundtrip_bound_rank2() {
        let x = arr2(&[[0.3f32, -1.7, 2.9, 0.01], [-4.2, 0.0, 1.1, 3.3]]).into_dyn();
        let (q, s) = vectorwise_quant(&x, &[1], QuantType::Vector).unwrap();
        let back = vectorwise_dequant(&q, &s).unwrap();
        for (row, (orig, rec)) in x.rows().into_iter().zip(back.rows()).enumerate() {
            let bound = 0.5 * s[[row, 0]] / 127.0 + 1e-6;
            for (&a, &b) in orig.iter().zip(rec.iter()) {
                assert!((a - b).abs() <= bound, "row {row}: {a} vs {b} exceeds {bound}");
            }
        }
    }

    #[test]
    fn test_roundtrip_bound_rank3_batch_axes() {
        let x = arr3(&[
            [[0.5f32, -1.5, 2.0], [1.0, 0.25, -0.75]],
            [[-2.5, 1.75, 0.125], [3.0, -0.5, 1.25]],
        ])
        .into_dyn();
        let (q, s) = vectorwise_quant(&x, &[0, 1], QuantType::Vector).unwrap();
        let back = vectorwise_dequant(&q, &s).unwrap();
        for (idx, &a) in x.indexed_iter() {
            let col = idx[2];
            let bound = 0.5 * s[[0, 0, col]] / 127.0 + 1e-6;
            assert!((a - back[idx.clone()]).abs() <= bound);
        }
    }

    #[test]
    fn test_zero_slice_quantizes_to_zero() {
        let x = arr2(&[[0.0f32, 0.0], [1.0, -1.0]]).into_dyn();
        let (q, s) = vectorwise_quant(&x, &[1], QuantType::Vector).unwrap();
        assert_abs_diff_eq!(s[[0, 0]], 0.0);
        assert_eq!(q[[0, 0]], 0);
        assert_eq!(q[[0, 1]], 0);
        let back = vectorwise_dequant(&q, &s).unwrap();
        assert_abs_diff_eq!(back[[0, 0]], 0.0);
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let x = arr2(&[[1.0f32, f32::NAN]]).into_dyn();
        let err = vectorwise_quant(&x, &[1], QuantType::Vector).unwrap_err();
        assert!(matches!(err, MatMulError::NonFiniteInput));

        let x = arr2(&[[1.0f32, f32::INFINITY]]).into_dyn();
        assert!(vectorwise_quant(&x, &[1], QuantType::Vector).is_err());
    }

    #[test]
    fn test_mm_dequant_known_values() {
        // acc = 127 * 127, scales 4 and 2 -> 4 * 2 = 8
        let acc = arr2(&[[16129i32]]).into_dyn();
        let sa = arr2(&[[4.0f32]]).into_dyn();
        let sb = arr2(&[[2.0f32]]).into_dyn();
        let out = vectorwise_mm_dequant(&acc, &sa, &sb).unwrap();
        assert_abs_diff_eq!(out[[0, 0]], 8.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mm_dequant_broadcasts_scales() {
        let acc = arr2(&[[16129i32, 16129], [16129, 16129]]).into_dyn();
        let sa = arr2(&[[1.0f32], [2.0]]).into_dyn(); // per-row
        let sb = arr2(&[[3.0f32, 4.0]]).into_dyn(); // per-col
        let out = vectorwise_mm_dequant(&acc, &sa, &sb).unwrap();
        assert_abs_diff_eq!(out[[0, 0]], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[0, 1]], 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 0]], 6.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[1, 1]], 8.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mm_dequant_incompatible_scale_shape() {
        let acc = arr2(&[[1i32, 2], [3, 4]]).into_dyn();
        let sa = arr2(&[[1.0f32], [2.0], [3.0]]).into_dyn();
        let sb = arr2(&[[1.0f32, 1.0]]).into_dyn();
        assert!(vectorwise_mm_dequant(&acc, &sa, &sb).is_err());
    }
}
