//! Entropic optimal transport (Sinkhorn-Knopp scaling).
//!
//! Solves
//! \[
//! \min_{G \in \Pi(a,b)} \langle G, M\rangle - \mathrm{reg}\cdot H(G)
//! \]
//! whose solution has the form `G = diag(u) K diag(v)` with `K = exp(-M / reg)`.
//!
//! Two scaling schemes:
//!
//! - [`SinkhornMethod::Standard`]: plain alternating scaling. Fails with
//!   [`Error::NumericalInstability`] as soon as a kernel row / column underflows.
//! - [`SinkhornMethod::Stabilized`]: scalings are periodically absorbed into dual potentials
//!   (`alpha`, `beta`) so the working kernel `exp((alpha + beta - M) / reg)` stays in range.
//!   Potentials start at the c-transforms of `M`, which puts an entry equal to 1 in every kernel
//!   row and column carrying mass; zero-mass rows and columns are held at `-inf`. Any remaining
//!   underflow triggers a log-sum-exp refresh of the potentials, counted in
//!   [`SinkhornLog::refreshes`].
//!
//! The marginal error (max absolute deviation of row / column sums) is checked every
//! [`CHECK_EVERY`] iterations and at the final iteration.

use crate::cost::validate_cost;
use crate::simplex::check_marginals;
use crate::solution::{Diagnostics, Solution};
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Iterations between two marginal-error checks.
pub const CHECK_EVERY: usize = 10;

/// Relative tolerance when comparing total masses of the two marginals.
const MASS_RTOL: f64 = 1e-7;

/// Scaling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkhornMethod {
    #[default]
    Standard,
    Stabilized,
}

/// Sinkhorn configuration.
#[derive(Debug, Clone)]
pub struct SinkhornConfig {
    pub method: SinkhornMethod,
    /// Stop once the marginal error is below this.
    pub tol: f64,
    pub max_iter: usize,
    /// Absorption threshold for the stabilized method.
    pub tau: f64,
    pub verbose: bool,
    pub log: bool,
}

impl Default for SinkhornConfig {
    fn default() -> Self {
        Self {
            method: SinkhornMethod::Standard,
            tol: 1e-9,
            max_iter: 1000,
            tau: 1e3,
            verbose: false,
            log: false,
        }
    }
}

impl SinkhornConfig {
    /// Default config with the stabilized scheme.
    pub fn stabilized() -> Self {
        Self {
            method: SinkhornMethod::Stabilized,
            ..Self::default()
        }
    }
}

/// Diagnostics of a Sinkhorn solve.
#[derive(Debug, Clone)]
pub struct SinkhornLog {
    /// Marginal error at each check.
    pub err: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Source dual potential `reg·ln(u)` (plus absorbed potential for the stabilized method).
    pub u: Array1<f64>,
    /// Target dual potential.
    pub v: Array1<f64>,
    /// Log-domain refreshes of the working kernel (always 0 for the standard method).
    pub refreshes: usize,
}

impl Diagnostics for SinkhornLog {
    fn converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.iterations
    }
}

fn validate(
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
    cost: &ArrayView2<f64>,
    reg: f64,
    cfg: &SinkhornConfig,
) -> Result<()> {
    let (sa, sb) = check_marginals(a, b)?;
    validate_cost(cost, a.len(), b.len())?;
    if !(reg > 0.0) || !reg.is_finite() {
        return Err(Error::Domain("reg must be positive and finite"));
    }
    if !(cfg.tol >= 0.0) || !cfg.tol.is_finite() {
        return Err(Error::Domain("tol must be finite and >= 0"));
    }
    if cfg.max_iter == 0 {
        return Err(Error::Domain("max_iter must be >= 1"));
    }
    if !(cfg.tau > 1.0) {
        return Err(Error::Domain("tau must be > 1"));
    }
    if (sa - sb).abs() > MASS_RTOL * sa.max(sb) {
        return Err(Error::InfeasibleMarginals {
            source_mass: sa,
            target_mass: sb,
        });
    }
    Ok(())
}

/// `out_i = num_i / den_i`, with `0` wherever `num_i == 0`.
///
/// Returns `false` if a positive `num_i` met a zero / non-finite denominator.
fn update_scaling(num: &ArrayView1<f64>, den: &Array1<f64>, out: &mut Array1<f64>) -> bool {
    let mut ok = true;
    for ((o, &x), &d) in out.iter_mut().zip(num.iter()).zip(den.iter()) {
        if x == 0.0 {
            *o = 0.0;
            continue;
        }
        let s = x / d;
        if !(d > 0.0) || !s.is_finite() {
            ok = false;
        }
        *o = s;
    }
    ok
}

/// Largest deviation of the row and column sums of `diag(u) K diag(v)` from `(a, b)`.
fn marginal_error(
    k: &Array2<f64>,
    u: &Array1<f64>,
    v: &Array1<f64>,
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
) -> f64 {
    let rows = k.dot(v) * u;
    let cols = k.t().dot(u) * v;
    let mut err = 0.0f64;
    for (r, &ai) in rows.iter().zip(a.iter()) {
        err = err.max((r - ai).abs());
    }
    for (c, &bj) in cols.iter().zip(b.iter()) {
        err = err.max((c - bj).abs());
    }
    err
}

fn scaled_plan(k: &Array2<f64>, u: &Array1<f64>, v: &Array1<f64>) -> Array2<f64> {
    let mut plan = k.clone();
    for ((i, j), g) in plan.indexed_iter_mut() {
        *g *= u[i] * v[j];
    }
    plan
}

/// Numerically stable `ln Σ exp(x_i)`; `-inf` for an empty or all `-inf` input.
fn logsumexp(xs: impl Iterator<Item = f64> + Clone) -> f64 {
    let m = xs.clone().fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY {
        return m;
    }
    let s: f64 = xs.map(|x| (x - m).exp()).sum();
    m + s.ln()
}

/// Working kernel `exp((alpha_i + beta_j - M_ij) / reg)`.
fn stabilized_kernel(
    cost: &ArrayView2<f64>,
    alpha: &Array1<f64>,
    beta: &Array1<f64>,
    reg: f64,
) -> Array2<f64> {
    Array2::from_shape_fn(cost.dim(), |(i, j)| {
        ((alpha[i] + beta[j] - cost[[i, j]]) / reg).exp()
    })
}

/// Total potential `base + reg·ln(s)`, falling back to `base` where the scaling is unusable.
fn total_potential(base: &Array1<f64>, s: &Array1<f64>, w: &ArrayView1<f64>, reg: f64) -> Array1<f64> {
    Array1::from_shape_fn(base.len(), |i| {
        if w[i] == 0.0 {
            f64::NEG_INFINITY
        } else if s[i] > 0.0 && s[i].is_finite() {
            base[i] + reg * s[i].ln()
        } else {
            base[i]
        }
    })
}

/// Scalings back to 1 after their log was moved into the potentials; zero-mass entries stay 0.
fn reset_scalings(s: &mut Array1<f64>, w: &ArrayView1<f64>) {
    for (x, &wi) in s.iter_mut().zip(w.iter()) {
        *x = if wi > 0.0 { 1.0 } else { 0.0 };
    }
}

/// One exact log-domain Sinkhorn sweep; replaces `(alpha, beta)` and resets the scalings.
#[allow(clippy::too_many_arguments)]
fn log_refresh(
    cost: &ArrayView2<f64>,
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
    reg: f64,
    alpha: &mut Array1<f64>,
    beta: &mut Array1<f64>,
    u: &mut Array1<f64>,
    v: &mut Array1<f64>,
) {
    let (m, n) = cost.dim();
    let f = total_potential(alpha, u, a, reg);
    let mut g = Array1::<f64>::zeros(n);
    for j in 0..n {
        g[j] = if b[j] == 0.0 {
            f64::NEG_INFINITY
        } else {
            let lse = logsumexp((0..m).map(|i| (f[i] - cost[[i, j]]) / reg));
            reg * b[j].ln() - reg * lse
        };
    }
    let mut f_new = Array1::<f64>::zeros(m);
    for i in 0..m {
        f_new[i] = if a[i] == 0.0 {
            f64::NEG_INFINITY
        } else {
            let lse = logsumexp((0..n).map(|j| (g[j] - cost[[i, j]]) / reg));
            reg * a[i].ln() - reg * lse
        };
    }
    *alpha = f_new;
    *beta = g;
    reset_scalings(u, a);
    reset_scalings(v, b);
}

/// Entropic transport plan between `a` and `b` for cost `M` with regularization `reg`.
///
/// Hitting `max_iter` is not an error: the last iterate is returned and the log (when
/// requested) says `converged == false`.
pub fn sinkhorn(
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
    cost: &ArrayView2<f64>,
    reg: f64,
    cfg: &SinkhornConfig,
) -> Result<Solution<SinkhornLog>> {
    validate(a, b, cost, reg, cfg)?;
    match cfg.method {
        SinkhornMethod::Standard => sinkhorn_knopp(a, b, cost, reg, cfg),
        SinkhornMethod::Stabilized => sinkhorn_stabilized(a, b, cost, reg, cfg),
    }
}

/// Entropic transport cost `⟨G, M⟩` of the Sinkhorn plan (see [`sinkhorn`]).
pub fn sinkhorn2(
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
    cost: &ArrayView2<f64>,
    reg: f64,
    cfg: &SinkhornConfig,
) -> Result<f64> {
    Ok(sinkhorn(a, b, cost, reg, cfg)?.value)
}

fn transport_cost(plan: &Array2<f64>, cost: &ArrayView2<f64>) -> f64 {
    (plan * cost).sum()
}

fn sinkhorn_knopp(
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
    cost: &ArrayView2<f64>,
    reg: f64,
    cfg: &SinkhornConfig,
) -> Result<Solution<SinkhornLog>> {
    let (m, n) = cost.dim();
    let k = cost.mapv(|c| (-c / reg).exp());
    let mut u = Array1::from_elem(m, 1.0 / m as f64);
    let mut v = Array1::from_elem(n, 1.0 / n as f64);

    let mut errs = Vec::new();
    let mut converged = false;
    let mut iterations = 0usize;
    for it in 0..cfg.max_iter {
        iterations = it + 1;
        let kv = k.dot(&v);
        if !update_scaling(a, &kv, &mut u) {
            return Err(Error::NumericalInstability(
                "kernel row underflow; increase reg or use the stabilized method",
            ));
        }
        let ktu = k.t().dot(&u);
        if !update_scaling(b, &ktu, &mut v) {
            return Err(Error::NumericalInstability(
                "kernel column underflow; increase reg or use the stabilized method",
            ));
        }

        if it % CHECK_EVERY == 0 || it + 1 == cfg.max_iter {
            let err = marginal_error(&k, &u, &v, a, b);
            if !err.is_finite() {
                return Err(Error::NumericalInstability("sinkhorn produced NaN"));
            }
            errs.push(err);
            progress!(cfg.verbose, it, err, "sinkhorn");
            if err < cfg.tol {
                converged = true;
                break;
            }
        }
    }
    if !converged {
        tracing::warn!(max_iter = cfg.max_iter, "sinkhorn: iteration cap reached");
    }

    let plan = scaled_plan(&k, &u, &v);
    let value = transport_cost(&plan, cost);
    let log = cfg.log.then(|| SinkhornLog {
        err: errs,
        iterations,
        converged,
        u: u.mapv(|x| reg * x.ln()),
        v: v.mapv(|x| reg * x.ln()),
        refreshes: 0,
    });
    Ok(Solution { plan, value, log })
}

fn sinkhorn_stabilized(
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
    cost: &ArrayView2<f64>,
    reg: f64,
    cfg: &SinkhornConfig,
) -> Result<Solution<SinkhornLog>> {
    let (m, n) = cost.dim();

    // c-transform initialization: every row and column of the kernel with positive mass has
    // an entry equal to 1. Zero-mass entries are pinned at -inf so their kernel rows / columns
    // stay exactly 0 through every absorption.
    let mut alpha = Array1::from_shape_fn(m, |i| {
        if a[i] == 0.0 {
            f64::NEG_INFINITY
        } else {
            cost.row(i).iter().copied().fold(f64::INFINITY, f64::min)
        }
    });
    let mut beta = Array1::from_shape_fn(n, |j| {
        if b[j] == 0.0 {
            f64::NEG_INFINITY
        } else {
            (0..m)
                .map(|i| cost[[i, j]] - alpha[i])
                .fold(f64::INFINITY, f64::min)
        }
    });
    let mut k = stabilized_kernel(cost, &alpha, &beta, reg);
    let mut u = Array1::from_elem(m, 1.0 / m as f64);
    let mut v = Array1::from_elem(n, 1.0 / n as f64);
    let mut u_new = u.clone();
    let mut v_new = v.clone();

    let mut errs = Vec::new();
    let mut converged = false;
    let mut iterations = 0usize;
    let mut refreshes = 0usize;
    for it in 0..cfg.max_iter {
        iterations = it + 1;
        let ktu = k.t().dot(&u);
        let mut ok = update_scaling(b, &ktu, &mut v_new);
        if ok {
            let kv = k.dot(&v_new);
            ok = update_scaling(a, &kv, &mut u_new);
        }
        if !ok {
            // Underflow in the working kernel: redo this sweep in the log domain.
            refreshes += 1;
            log_refresh(cost, a, b, reg, &mut alpha, &mut beta, &mut u, &mut v);
            k = stabilized_kernel(cost, &alpha, &beta, reg);
            let ktu = k.t().dot(&u);
            let kv_ok = update_scaling(b, &ktu, &mut v_new);
            let kv = k.dot(&v_new);
            if !kv_ok || !update_scaling(a, &kv, &mut u_new) {
                return Err(Error::NumericalInstability(
                    "kernel underflow persists after log-domain refresh",
                ));
            }
        }
        std::mem::swap(&mut u, &mut u_new);
        std::mem::swap(&mut v, &mut v_new);

        let max_u = u.iter().fold(0.0f64, |acc, x| acc.max(x.abs()));
        let max_v = v.iter().fold(0.0f64, |acc, x| acc.max(x.abs()));
        if max_u > cfg.tau || max_v > cfg.tau {
            for i in 0..m {
                if u[i] > 0.0 {
                    alpha[i] += reg * u[i].ln();
                }
            }
            for j in 0..n {
                if v[j] > 0.0 {
                    beta[j] += reg * v[j].ln();
                }
            }
            reset_scalings(&mut u, a);
            reset_scalings(&mut v, b);
            k = stabilized_kernel(cost, &alpha, &beta, reg);
        }

        if it % CHECK_EVERY == 0 || it + 1 == cfg.max_iter {
            let err = marginal_error(&k, &u, &v, a, b);
            if !err.is_finite() {
                return Err(Error::NumericalInstability("stabilized sinkhorn produced NaN"));
            }
            errs.push(err);
            progress!(cfg.verbose, it, err, "sinkhorn (stabilized)");
            if err < cfg.tol {
                converged = true;
                break;
            }
        }
    }
    if refreshes > 0 {
        tracing::debug!(refreshes, "sinkhorn: log-domain refreshes");
    }
    if !converged {
        tracing::warn!(max_iter = cfg.max_iter, "sinkhorn (stabilized): iteration cap reached");
    }

    let plan = scaled_plan(&k, &u, &v);
    let value = transport_cost(&plan, cost);
    let log = cfg.log.then(|| SinkhornLog {
        err: errs,
        iterations,
        converged,
        u: total_potential(&alpha, &u, a, reg),
        v: total_potential(&beta, &v, b, reg),
        refreshes,
    });
    Ok(Solution { plan, value, log })
}
