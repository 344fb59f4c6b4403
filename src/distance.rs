//! Distance kernels used by training and query execution.
//!
//! Ranking paths use squared L2 throughout: it is monotone in the true
//! distance and skips the sqrt. The GEMM path is a strict performance
//! alternative for dense score matrices; it expands
//! `(a - b)^2 = a^2 + b^2 - 2ab` with a single-precision matrix multiply
//! plus two rank-one updates, then applies a global sqrt, so its output is
//! the non-squared distance.

use crate::error::{QuarryDbError, Result};
use crate::matrix::{Element, Layout, Matrix};

/// Squared Euclidean distance between two equal-length vectors.
///
/// # Panics
/// Panics if the slices have different lengths.
#[inline]
pub fn l2_squared<T: Element>(a: &[T], b: &[T]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x.to_f32() - y.to_f32();
        sum += diff * diff;
    }
    sum
}

/// Squared Euclidean distance between a corpus vector and an `f32` centroid.
///
/// Corpus elements are widened on the fly, so `u8` corpora compare against
/// float centroids without an intermediate copy.
#[inline]
pub fn l2_squared_f32<T: Element>(a: &[T], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x.to_f32() - y;
        sum += diff * diff;
    }
    sum
}

/// Fill `out[j]` with the sum of `f` over column `j` of `m`.
///
/// # Panics
/// Panics if `out.len() != m.num_cols()`.
pub fn col_sum<T, F>(m: &Matrix<T>, out: &mut [f32], f: F)
where
    T: Element,
    F: Fn(f32) -> f32,
{
    assert_eq!(out.len(), m.num_cols(), "output length must match columns");

    match m.layout() {
        Layout::ColMajor => {
            for (j, slot) in out.iter_mut().enumerate() {
                *slot = m.col(j).iter().map(|&v| f(v.to_f32())).sum();
            }
        }
        Layout::RowMajor => {
            out.fill(0.0);
            for i in 0..m.num_rows() {
                for (j, &v) in m.row(i).iter().enumerate() {
                    out[j] += f(v.to_f32());
                }
            }
        }
    }
}

/// Compute the full matrix of Euclidean distances between the columns of
/// `a` (`D x M`) and the columns of `b` (`D x N`) with a GEMM.
///
/// The result is an `M x N` column-major matrix whose column `j` holds the
/// distances of `b[:, j]` against every column of `a`. Internally computes
/// `C = -2 * A^T * B`, adds the outer products of the squared column norms,
/// clamps small negative residue from cancellation, and takes the sqrt.
///
/// # Errors
/// Returns a `Config` error if the inputs are not col-major or their row
/// counts differ.
pub fn gemm_l2_distances(a: &Matrix<f32>, b: &Matrix<f32>) -> Result<Matrix<f32>> {
    if a.layout() != Layout::ColMajor || b.layout() != Layout::ColMajor {
        return Err(QuarryDbError::config(
            "gemm distance path requires col-major operands",
        ));
    }
    if a.num_rows() != b.num_rows() {
        return Err(QuarryDbError::dimension_mismatch(a.num_rows(), b.num_rows()));
    }

    let d = a.num_rows();
    let m = a.num_cols();
    let n = b.num_cols();

    let mut scores = Matrix::<f32>::col_major(m, n);
    if m == 0 || n == 0 {
        return Ok(scores);
    }

    // C(M x N) = -2 * A^T(M x D) * B(D x N). Both operands are col-major,
    // so A^T has row stride D and column stride 1.
    unsafe {
        matrixmultiply::sgemm(
            m,
            d,
            n,
            -2.0,
            a.data().as_ptr(),
            d as isize,
            1,
            b.data().as_ptr(),
            1,
            d as isize,
            0.0,
            scores.raveled_mut().as_mut_ptr(),
            1,
            m as isize,
        );
    }

    let mut alpha = vec![0.0f32; m];
    let mut beta = vec![0.0f32; n];
    col_sum(a, &mut alpha, |v| v * v);
    col_sum(b, &mut beta, |v| v * v);

    for j in 0..n {
        let col = scores.col_mut(j);
        let b_norm = beta[j];
        for (i, slot) in col.iter_mut().enumerate() {
            // Cancellation can leave tiny negatives; clamp before sqrt.
            *slot = (*slot + alpha[i] + b_norm).max(0.0).sqrt();
        }
    }

    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_squared_identical() {
        let a = vec![1.0f32, 2.0, 3.0];
        assert!(l2_squared(&a, &a) < 1e-6);
    }

    #[test]
    fn test_l2_squared_simple() {
        let a = vec![0.0f32, 0.0];
        let b = vec![3.0f32, 4.0];
        assert!((l2_squared(&a, &b) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_squared_u8() {
        let a = vec![0u8, 10];
        let b = vec![3u8, 6];
        assert!((l2_squared(&a, &b) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_squared_mixed_element_types() {
        let a = vec![2u8, 2];
        let b = vec![0.5f32, 0.5];
        assert!((l2_squared_f32(&a, &b) - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_col_sum_squares() {
        let m = Matrix::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], 2, 2, Layout::ColMajor).unwrap();
        let mut out = vec![0.0f32; 2];
        col_sum(&m, &mut out, |v| v * v);
        assert!((out[0] - 5.0).abs() < 1e-6);
        assert!((out[1] - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_col_sum_row_major() {
        let m = Matrix::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], 2, 2, Layout::RowMajor).unwrap();
        let mut out = vec![0.0f32; 2];
        col_sum(&m, &mut out, |v| v);
        assert!((out[0] - 4.0).abs() < 1e-6);
        assert!((out[1] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_gemm_matches_pairwise() {
        // Deterministic fill; values spread over a few orders of magnitude.
        let d = 16;
        let m = 7;
        let n = 5;
        let mut a = Matrix::<f32>::col_major(d, m);
        let mut b = Matrix::<f32>::col_major(d, n);
        for j in 0..m {
            for i in 0..d {
                a.set(i, j, ((i * 31 + j * 7) % 13) as f32 - 6.0);
            }
        }
        for j in 0..n {
            for i in 0..d {
                b.set(i, j, ((i * 17 + j * 5) % 11) as f32 - 5.0);
            }
        }

        let scores = gemm_l2_distances(&a, &b).unwrap();
        assert_eq!(scores.num_rows(), m);
        assert_eq!(scores.num_cols(), n);

        for j in 0..n {
            for i in 0..m {
                let exact = l2_squared(a.col(i), b.col(j)).sqrt();
                let got = scores.get(i, j);
                let tol = 1e-4 * exact.max(1.0);
                assert!(
                    (got - exact).abs() <= tol,
                    "gemm {} vs pairwise {} at ({}, {})",
                    got,
                    exact,
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_gemm_rejects_row_major() {
        let a = Matrix::<f32>::new(4, 2, Layout::RowMajor);
        let b = Matrix::<f32>::col_major(4, 2);
        assert!(gemm_l2_distances(&a, &b).is_err());
    }
}
