//! Cost and structure matrices.
//!
//! A **cost matrix** is `m×n` (source support × target support). A **structure matrix** is the
//! square, symmetric, zero-diagonal special case built from one point set against itself.
//!
//! Builders here never normalize behind your back; [`normalize_max`] is explicit.

use crate::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Ground metric between points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Metric {
    /// `‖x - y‖²` (the conventional default for OT between point clouds).
    #[default]
    SqEuclidean,
    /// `‖x - y‖`.
    Euclidean,
}

#[inline]
fn l2_squared(a: &ArrayView1<'_, f64>, b: &ArrayView1<'_, f64>) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut s = 0.0f64;
    for i in 0..a.len() {
        let d = a[i] - b[i];
        s += d * d;
    }
    s
}

impl Metric {
    #[inline]
    fn eval(self, a: &ArrayView1<'_, f64>, b: &ArrayView1<'_, f64>) -> f64 {
        match self {
            Metric::SqEuclidean => l2_squared(a, b),
            Metric::Euclidean => l2_squared(a, b).sqrt(),
        }
    }
}

/// Pairwise cost between two point sets: `C[i, j] = metric(x_i, y_j)`.
///
/// - `x`: `m×d`
/// - `y`: `n×d`
pub fn dist(x: &ArrayView2<f64>, y: &ArrayView2<f64>, metric: Metric) -> Result<Array2<f64>> {
    if x.ncols() != y.ncols() {
        return Err(Error::DimensionMismatch("x and y must have the same dimension"));
    }
    if x.iter().any(|v| !v.is_finite()) || y.iter().any(|v| !v.is_finite()) {
        return Err(Error::Degenerate("x/y contain NaN/Inf"));
    }
    let (m, n) = (x.nrows(), y.nrows());
    let mut cost = Array2::<f64>::zeros((m, n));
    for i in 0..m {
        let xi = x.row(i);
        for j in 0..n {
            cost[[i, j]] = metric.eval(&xi, &y.row(j));
        }
    }
    Ok(cost)
}

/// Symmetric structure matrix of one point set against itself (exact zero diagonal).
pub fn dist_self(x: &ArrayView2<f64>, metric: Metric) -> Result<Array2<f64>> {
    if x.iter().any(|v| !v.is_finite()) {
        return Err(Error::Degenerate("x contains NaN/Inf"));
    }
    let n = x.nrows();
    let mut c = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        let xi = x.row(i);
        for j in (i + 1)..n {
            let d = metric.eval(&xi, &x.row(j));
            c[[i, j]] = d;
            c[[j, i]] = d;
        }
    }
    Ok(c)
}

/// `c / max(c)`. A zero matrix is returned unchanged.
pub fn normalize_max(c: &ArrayView2<f64>) -> Array2<f64> {
    let max = c.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        c.mapv(|v| v / max)
    } else {
        c.to_owned()
    }
}

/// Check a cost matrix against marginal lengths: shape `(m, n)`, finite, nonnegative.
pub fn validate_cost(cost: &ArrayView2<f64>, m: usize, n: usize) -> Result<()> {
    if cost.nrows() != m || cost.ncols() != n {
        return Err(Error::DimensionMismatch("cost matrix must have shape (len a, len b)"));
    }
    if cost.iter().any(|v| !v.is_finite()) {
        return Err(Error::Degenerate("cost matrix contains non-finite values"));
    }
    if cost.iter().any(|&v| v < 0.0) {
        return Err(Error::Degenerate("cost matrix must be nonnegative"));
    }
    Ok(())
}

/// Check a structure matrix: square of side `n`, finite, nonnegative.
///
/// Symmetry is not required (the stochastic solvers handle the asymmetric case), but the exact
/// conditional-gradient line search assumes it; see `cg`.
pub fn validate_structure(c: &ArrayView2<f64>, n: usize) -> Result<()> {
    if c.nrows() != c.ncols() {
        return Err(Error::DimensionMismatch("structure matrix must be square"));
    }
    if c.nrows() != n {
        return Err(Error::DimensionMismatch("structure matrix side must match its marginal"));
    }
    if c.iter().any(|v| !v.is_finite()) {
        return Err(Error::Degenerate("structure matrix contains non-finite values"));
    }
    if c.iter().any(|&v| v < 0.0) {
        return Err(Error::Degenerate("structure matrix must be nonnegative"));
    }
    Ok(())
}

/// Whether `c` equals its transpose within an absolute tolerance.
pub fn is_symmetric(c: &ArrayView2<f64>, tol: f64) -> bool {
    let n = c.nrows();
    if c.ncols() != n {
        return false;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if (c[[i, j]] - c[[j, i]]).abs() > tol {
                return false;
            }
        }
    }
    true
}
