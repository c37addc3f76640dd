//! Conditional gradient (Frank-Wolfe) for quadratic transport objectives.
//!
//! Minimizes, over couplings `G ∈ Π(p, q)`,
//! \[
//! f(G) = \langle M', G\rangle + \mathrm{reg}\cdot \sum_{ijkl} L(C_{1,ik}, C_{2,jl}) G_{ij} G_{kl}
//! \]
//! where `M'` is an optional linear cost. This covers GW (`M' = 0`, `reg = 1`) and fused GW
//! (`M' = (1-α)M`, `reg = α`).
//!
//! Each iteration linearizes `f` at `G`, solves the linear program with [`emd`], and moves
//! along the segment towards its solution. The objective is quadratic along the segment, so
//! the step is the exact minimizer on `[0, 1]` (closed form, any decomposable kernel).

use crate::cost::validate_structure;
use crate::emd::emd;
use crate::loss::{GwTensor, Loss};
use crate::simplex::check_marginals;
use crate::solution::Diagnostics;
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Relative tolerance when comparing total masses of the two marginals.
const MASS_RTOL: f64 = 1e-7;

/// Configuration shared by exact and fused Gromov-Wasserstein.
#[derive(Debug, Clone)]
pub struct GromovConfig {
    pub loss: Loss,
    pub max_iter: usize,
    /// Stop when `|Δf| / |f|` falls below this.
    pub tol: f64,
    /// Stop when `|Δf|` falls below this.
    pub tol_abs: f64,
    pub verbose: bool,
    pub log: bool,
}

impl Default for GromovConfig {
    fn default() -> Self {
        Self {
            loss: Loss::Square,
            max_iter: 1000,
            tol: 1e-9,
            tol_abs: 1e-9,
            verbose: false,
            log: false,
        }
    }
}

impl GromovConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.tol >= 0.0) || !self.tol.is_finite() {
            return Err(Error::Domain("tol must be finite and >= 0"));
        }
        if !(self.tol_abs >= 0.0) || !self.tol_abs.is_finite() {
            return Err(Error::Domain("tol_abs must be finite and >= 0"));
        }
        if self.max_iter == 0 {
            return Err(Error::Domain("max_iter must be >= 1"));
        }
        Ok(())
    }
}

/// Diagnostics of a conditional-gradient solve.
#[derive(Debug, Clone)]
pub struct CgLog {
    /// Objective after every iteration (entry 0 is the starting plan `p qᵀ`).
    pub loss: Vec<f64>,
    /// Step sizes chosen by the line search.
    pub steps: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Dual potentials of the last linear subproblem.
    pub u: Array1<f64>,
    pub v: Array1<f64>,
}

impl Diagnostics for CgLog {
    fn converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Shape / value checks for `(C1, C2, p, q)` before any iteration.
pub(crate) fn validate_structures(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
) -> Result<()> {
    let (sp, sq) = check_marginals(p, q)?;
    validate_structure(c1, p.len())?;
    validate_structure(c2, q.len())?;
    if (sp - sq).abs() > MASS_RTOL * sp.max(sq) {
        return Err(Error::InfeasibleMarginals {
            source_mass: sp,
            target_mass: sq,
        });
    }
    Ok(())
}

/// Exact minimizer of `a t² + b t` on `[0, 1]`.
pub(crate) fn solve_linesearch_quad(a: f64, b: f64) -> f64 {
    if a > 0.0 {
        (-b / (2.0 * a)).clamp(0.0, 1.0)
    } else if a + b < 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Shift a linearized cost by its minimum when negative (transport plans are shift-invariant).
pub(crate) fn shifted_nonnegative(mut cost: Array2<f64>) -> Result<Array2<f64>> {
    let min = cost.iter().copied().fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        return Err(Error::NumericalInstability("non-finite gradient"));
    }
    if min < 0.0 {
        cost.mapv_inplace(|x| x - min);
    }
    Ok(cost)
}

pub(crate) fn outer(p: &ArrayView1<f64>, q: &ArrayView1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((p.len(), q.len()), |(i, j)| p[i] * q[j])
}

fn frobenius_dot(x: &Array2<f64>, y: &Array2<f64>) -> f64 {
    x.iter().zip(y.iter()).map(|(a, b)| a * b).sum()
}

pub(crate) struct CgOutput {
    pub plan: Array2<f64>,
    pub value: f64,
    pub log: CgLog,
}

/// Frank-Wolfe loop. Inputs are assumed validated.
///
/// `linear` is `M'`, already scaled by the caller.
pub(crate) fn cg(
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    linear: Option<&Array2<f64>>,
    reg: f64,
    tensor: &GwTensor,
    cfg: &GromovConfig,
    label: &'static str,
) -> Result<CgOutput> {
    let (m, n) = (p.len(), q.len());
    let lin_value = |g: &Array2<f64>| linear.map_or(0.0, |mm| frobenius_dot(mm, g));

    let mut g = outer(p, q);
    // A = h1(C1) G h2(C2)ᵀ, updated along the segment instead of recomputed.
    let mut a_cache = tensor.cross(&g.view());
    let mut f_val = lin_value(&g) + reg * (frobenius_dot(&tensor.const_c, &g) - frobenius_dot(&a_cache, &g));

    let mut trace = vec![f_val];
    let mut steps = Vec::new();
    let mut converged = false;
    let mut iterations = 0usize;
    let mut duals = (Array1::<f64>::zeros(m), Array1::<f64>::zeros(n));

    for it in 1..=cfg.max_iter {
        iterations = it;

        // Linearized cost M' + reg·∇, shifted to be nonnegative for the exact solver.
        let mut mi = (&tensor.const_c - &a_cache) * (2.0 * reg);
        if let Some(mm) = linear {
            mi += mm;
        }
        let mi = shifted_nonnegative(mi)?;

        let sub = emd(p, q, &mi.view(), cfg.log)?;
        if let Some(l) = sub.log {
            duals = (l.u, l.v);
        }
        let d = &sub.plan - &g;
        let b_mat = tensor.cross(&d.view());

        let a_coef = -reg * frobenius_dot(&b_mat, &d);
        let b_coef = lin_value(&d) + reg * frobenius_dot(&tensor.const_c, &d)
            - reg * (frobenius_dot(&b_mat, &g) + frobenius_dot(&a_cache, &d));
        let t = solve_linesearch_quad(a_coef, b_coef);

        g.scaled_add(t, &d);
        a_cache.scaled_add(t, &b_mat);
        let f_new = lin_value(&g) + reg * (frobenius_dot(&tensor.const_c, &g) - frobenius_dot(&a_cache, &g));

        let abs_delta = (f_new - f_val).abs();
        let rel_delta = if f_new != 0.0 { abs_delta / f_new.abs() } else { abs_delta };
        f_val = f_new;
        trace.push(f_val);
        steps.push(t);
        progress!(cfg.verbose, it, loss = f_val, rel_delta, abs_delta, step = t, "{label}");

        if rel_delta < cfg.tol || abs_delta < cfg.tol_abs {
            converged = true;
            break;
        }
    }
    if !converged {
        tracing::warn!(max_iter = cfg.max_iter, "{label}: iteration cap reached");
    }

    Ok(CgOutput {
        plan: g,
        value: f_val,
        log: CgLog {
            loss: trace,
            steps,
            iterations,
            converged,
            u: duals.0,
            v: duals.1,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn linesearch_picks_the_segment_minimizer() {
        // Convex with interior minimum at 0.25.
        assert!((solve_linesearch_quad(2.0, -1.0) - 0.25).abs() < 1e-15);
        // Convex, minimum past the end.
        assert_eq!(solve_linesearch_quad(1.0, -5.0), 1.0);
        // Concave: compare endpoints.
        assert_eq!(solve_linesearch_quad(-1.0, 0.5), 1.0);
        assert_eq!(solve_linesearch_quad(-1.0, 2.0), 0.0);
        // Flat.
        assert_eq!(solve_linesearch_quad(0.0, 0.0), 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_linesearch_beats_a_grid(a in -5.0f64..5.0, b in -5.0f64..5.0) {
            let t = solve_linesearch_quad(a, b);
            prop_assert!((0.0..=1.0).contains(&t));
            let f = |x: f64| a * x * x + b * x;
            for k in 0..=20 {
                let x = k as f64 / 20.0;
                prop_assert!(f(t) <= f(x) + 1e-12);
            }
        }
    }
}
