//! Distance kernels.
//!
//! Euclidean accepts unequal-length vectors, scoring over the shared prefix
//! plus a per-element-of-difference penalty. Cosine requires equal length;
//! callers filter incompatible dimensions before calling it (the clustered
//! store and HNSW index both do this at the call site).

use crate::error::{NbaseError, Result};
use crate::types::DistanceMetric;

/// Per-unit-of-length-difference penalty added to Euclidean distance when
/// the two vectors differ in dimension.
pub const DIMENSION_PENALTY: f32 = 0.01;

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::*;

/// Dot product over the shared prefix of `a` and `b`.
#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);

    #[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
    {
        unsafe { dot_product_avx2(a, b) }
    }
    #[cfg(not(all(target_arch = "x86_64", target_feature = "avx2")))]
    {
        dot_product_scalar(a, b)
    }
}

#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn dot_product_avx2(a: &[f32], b: &[f32]) -> f32 {
    const LANES: usize = 8;
    let len = a.len();
    let simd_len = len - (len % LANES);

    let mut sum = _mm256_setzero_ps();
    for i in (0..simd_len).step_by(LANES) {
        let va = _mm256_loadu_ps(a.as_ptr().add(i));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i));
        sum = _mm256_add_ps(sum, _mm256_mul_ps(va, vb));
    }

    let mut result = {
        let temp = _mm256_hadd_ps(sum, sum);
        let temp = _mm256_hadd_ps(temp, temp);
        let lo = _mm256_castps256_ps128(temp);
        let hi = _mm256_extractf128_ps(temp, 1);
        _mm_cvtss_f32(_mm_add_ps(lo, hi))
    };

    for i in simd_len..len {
        result += a[i] * b[i];
    }
    result
}

#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn sum_squared_diff(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    a[..n]
        .iter()
        .zip(&b[..n])
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
fn magnitude(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Euclidean distance plus a penalty proportional to the dimension
/// difference. Always finite and non-negative.
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    let core = sum_squared_diff(a, b).sqrt();
    let len_diff = (a.len() as i64 - b.len() as i64).unsigned_abs() as f32;
    core + DIMENSION_PENALTY * len_diff
}

/// Cosine distance, `1 - cos(theta)`. Requires `a.len() == b.len()`.
///
/// A zero vector has undefined direction; by convention it is treated as
/// maximally dissimilar to anything (distance `1.0`) rather than panicking
/// or dividing by zero.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(NbaseError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let na = magnitude(a);
    let nb = magnitude(b);
    if na == 0.0 || nb == 0.0 {
        return Ok(1.0);
    }
    let cos = dot_product(a, b) / (na * nb);
    Ok(1.0 - cos.clamp(-1.0, 1.0))
}

/// Dispatch on `metric`. Euclidean never fails; cosine fails on unequal
/// lengths (callers filter incompatible dimensions ahead of time).
pub fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> Result<f32> {
    match metric {
        DistanceMetric::Euclidean => Ok(euclidean(a, b)),
        DistanceMetric::Cosine => cosine(a, b),
    }
}

/// Parallel distance-from-query-to-many, used by clustered-store centroid
/// scoring and coordinator reranking.
pub fn batch_distances(query: &[f32], vectors: &[&[f32]], metric: DistanceMetric) -> Vec<f32> {
    use rayon::prelude::*;

    vectors
        .par_iter()
        .map(|v| distance(query, v, metric).unwrap_or(f32::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_matches_naive_reference() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 6.0, 3.0];
        let naive: f32 = a
            .iter()
            .zip(&b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f32>()
            .sqrt();
        assert!((euclidean(&a, &b) - naive).abs() < 1e-5);
    }

    #[test]
    fn euclidean_penalizes_dimension_mismatch() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![0.0, 0.0];
        let d = euclidean(&a, &b);
        assert!((d - DIMENSION_PENALTY).abs() < 1e-6);
    }

    #[test]
    fn cosine_identical_vectors_is_zero() {
        let a = vec![1.0, 2.0, 3.0];
        assert!(cosine(&a, &a).unwrap() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_one() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_unequal_length() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            cosine(&a, &b),
            Err(NbaseError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn distances_are_non_negative() {
        let a = vec![-1.0, 2.5, -3.0];
        let b = vec![3.0, -2.0, 1.0];
        assert!(euclidean(&a, &b) >= 0.0);
        assert!(cosine(&a, &b).unwrap() >= 0.0);
    }
}
