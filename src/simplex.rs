//! Marginals: probability vectors on the simplex.
//!
//! Public invariant: we do **not** silently normalize in methods named like “validate”.
//! If we normalize, the function name says so (`normalize_*`).

use crate::{Error, Result};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// Uniform marginal of length `n` (each entry `1/n`).
pub fn uniform(n: usize) -> Array1<f64> {
    Array1::from_elem(n, 1.0 / n as f64)
}

/// Check whether `p` lies on the probability simplex (within `tol`).
pub fn validate_simplex(p: &ArrayView1<f64>, tol: f64) -> Result<()> {
    if p.is_empty() {
        return Err(Error::DimensionMismatch("simplex vector must be non-empty"));
    }
    if !(tol >= 0.0) || !tol.is_finite() {
        return Err(Error::Domain("tol must be finite and >= 0"));
    }
    if p.iter().any(|&x| !x.is_finite()) {
        return Err(Error::Degenerate("simplex vector contains non-finite values"));
    }
    if p.iter().any(|&x| x < -tol) {
        return Err(Error::Degenerate("simplex vector has negative entries"));
    }
    let s: f64 = p.sum();
    if (s - 1.0).abs() > tol {
        return Err(Error::Domain("simplex vector does not sum to 1 (within tol)"));
    }
    Ok(())
}

/// Explicit normalization to the simplex via `p_i / sum(p)`, with checks.
pub fn normalize_simplex(p: &ArrayView1<f64>) -> Result<Array1<f64>> {
    check_weights(p)?;
    let s = p.sum();
    if !(s > 0.0) {
        return Err(Error::Degenerate("vector must have positive total mass"));
    }
    Ok(p.mapv(|x| x / s))
}

/// Validate a single marginal: non-empty, finite, nonnegative, positive mass.
///
/// Returns the total mass.
pub fn check_weights(p: &ArrayView1<f64>) -> Result<f64> {
    if p.is_empty() {
        return Err(Error::DimensionMismatch("marginal must be non-empty"));
    }
    if p.iter().any(|&x| !x.is_finite()) {
        return Err(Error::Degenerate("marginal contains non-finite values"));
    }
    if p.iter().any(|&x| x < 0.0) {
        return Err(Error::Degenerate("marginal must be nonnegative"));
    }
    let s = p.sum();
    if !(s > 0.0) {
        return Err(Error::Degenerate("marginal must have positive total mass"));
    }
    Ok(s)
}

/// Validate a pair of marginals and return their total masses `(sum a, sum b)`.
///
/// Masses are **not** compared here; exact transport does that itself.
pub fn check_marginals(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> Result<(f64, f64)> {
    Ok((check_weights(a)?, check_weights(b)?))
}

/// Largest absolute deviation between the row / column sums of `plan` and `(a, b)`.
pub fn plan_marginal_error(
    plan: &ArrayView2<f64>,
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
) -> Result<f64> {
    if plan.nrows() != a.len() || plan.ncols() != b.len() {
        return Err(Error::DimensionMismatch("plan shape must be (len a, len b)"));
    }
    let rows = plan.sum_axis(Axis(1));
    let cols = plan.sum_axis(Axis(0));
    let mut err = 0.0f64;
    for (r, &ai) in rows.iter().zip(a.iter()) {
        err = err.max((r - ai).abs());
    }
    for (c, &bj) in cols.iter().zip(b.iter()) {
        err = err.max((c - bj).abs());
    }
    Ok(err)
}
