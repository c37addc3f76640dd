//! Gromov-Wasserstein and fused GW barycenters.
//!
//! Fixed-point iteration: couple every input to the current barycenter, then replace the
//! barycenter by the minimizer of the weighted objective for those couplings
//! ([`Loss::update_structure`], and the barycentric projection for features).
//!
//! The per-input couplings of one iteration only read the barycenter of the previous
//! iteration. With the `parallel` feature they run on `rayon`; results are collected in input
//! order, so the output does not depend on the feature.

use crate::cg::{validate_structures, GromovConfig};
use crate::cost::{dist, dist_self, normalize_max, validate_structure, Metric};
use crate::fused::{barycentric_features, fused_gromov_wasserstein};
use crate::gromov::{entropic_gromov_wasserstein, gromov_wasserstein, EntropicGromovConfig};
use crate::loss::Loss;
use crate::simplex::{check_weights, validate_simplex};
use crate::solution::Diagnostics;
use crate::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// Iterations between two structure-error checks of [`gromov_barycenters`].
const CHECK_EVERY: usize = 10;
/// Tolerance on `Σ λ_s = 1`.
const LAMBDA_TOL: f64 = 1e-6;

/// Inner coupling solver of [`gromov_barycenters`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BarycenterSolver {
    /// Conditional-gradient GW.
    #[default]
    Exact,
    /// Entropic GW with the given regularization.
    Entropic { epsilon: f64 },
}

/// Configuration of the barycenter solvers.
///
/// `fixed_structure`, `fixed_features` and `init_features` only apply to [`fgw_barycenters`];
/// a frozen matrix must be supplied through the matching `init_*` field.
#[derive(Debug, Clone)]
pub struct BarycenterConfig {
    pub loss: Loss,
    pub solver: BarycenterSolver,
    pub max_iter: usize,
    /// Stop when the barycenter moves less than this (Frobenius norm).
    pub tol: f64,
    /// Relative tolerance of every inner coupling solve.
    pub inner_tol: f64,
    /// Seed of the random initial structure (used when `init_structure` is `None`).
    pub seed: u64,
    pub init_structure: Option<Array2<f64>>,
    pub init_features: Option<Array2<f64>>,
    pub fixed_structure: bool,
    pub fixed_features: bool,
    pub verbose: bool,
    pub log: bool,
}

impl Default for BarycenterConfig {
    fn default() -> Self {
        Self {
            loss: Loss::Square,
            solver: BarycenterSolver::Exact,
            max_iter: 1000,
            tol: 1e-9,
            inner_tol: 1e-5,
            seed: 0,
            init_structure: None,
            init_features: None,
            fixed_structure: false,
            fixed_features: false,
            verbose: false,
            log: false,
        }
    }
}

/// Diagnostics of a barycenter solve.
#[derive(Debug, Clone)]
pub struct BarycenterLog {
    /// `‖C - C_prev‖_F` at each check.
    pub err_structure: Vec<f64>,
    /// `‖X - X_prev‖_F` at each check (empty for structure-only barycenters).
    pub err_features: Vec<f64>,
    /// `Σ_s λ_s · d_s` of the couplings found at every iteration.
    pub objective: Vec<f64>,
    /// Couplings of the last iteration, in input order.
    pub couplings: Vec<Array2<f64>>,
    pub iterations: usize,
    pub converged: bool,
}

impl Diagnostics for BarycenterLog {
    fn converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Structure-only barycenter.
#[derive(Debug, Clone)]
pub struct GwBarycenter {
    /// `size × size`.
    pub structure: Array2<f64>,
    pub log: Option<BarycenterLog>,
}

/// Fused barycenter.
#[derive(Debug, Clone)]
pub struct FgwBarycenter {
    /// `size × d`.
    pub features: Array2<f64>,
    /// `size × size`.
    pub structure: Array2<f64>,
    pub log: Option<BarycenterLog>,
}

/// Map `f` over input indices, in parallel when enabled, keeping input order.
fn per_input<T, F>(count: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        (0..count).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        (0..count).map(f).collect()
    }
}

fn frobenius_distance(x: &Array2<f64>, y: &Array2<f64>) -> f64 {
    x.iter().zip(y.iter()).map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt()
}

fn validate_config(cfg: &BarycenterConfig) -> Result<()> {
    if cfg.max_iter == 0 {
        return Err(Error::Domain("max_iter must be >= 1"));
    }
    if !(cfg.tol >= 0.0) || !cfg.tol.is_finite() {
        return Err(Error::Domain("tol must be finite and >= 0"));
    }
    if !(cfg.inner_tol >= 0.0) || !cfg.inner_tol.is_finite() {
        return Err(Error::Domain("inner_tol must be finite and >= 0"));
    }
    if let BarycenterSolver::Entropic { epsilon } = cfg.solver {
        if !(epsilon > 0.0) || !epsilon.is_finite() {
            return Err(Error::Domain("epsilon must be positive and finite"));
        }
    }
    Ok(())
}

/// Shape checks shared by both barycenter families, before the structure is initialized.
fn validate_collection(
    size: usize,
    structures: &[ArrayView2<f64>],
    marginals: &[ArrayView1<f64>],
    p: &ArrayView1<f64>,
    lambdas: &[f64],
) -> Result<()> {
    if size == 0 {
        return Err(Error::DimensionMismatch("barycenter size must be >= 1"));
    }
    if structures.is_empty() {
        return Err(Error::DimensionMismatch("at least one input structure is required"));
    }
    if marginals.len() != structures.len() || lambdas.len() != structures.len() {
        return Err(Error::DimensionMismatch(
            "structures, marginals and lambdas must have the same length",
        ));
    }
    if p.len() != size {
        return Err(Error::DimensionMismatch("barycenter marginal must have length size"));
    }
    check_weights(p)?;
    validate_simplex(&ArrayView1::from(lambdas), LAMBDA_TOL)
}

/// Given structure, or the normalized squared distances of `size` Gaussian points in 2-D.
fn initial_structure(size: usize, cfg: &BarycenterConfig) -> Result<Array2<f64>> {
    if let Some(c) = &cfg.init_structure {
        validate_structure(&c.view(), size)?;
        return Ok(c.clone());
    }
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let points: Array2<f64> = Array2::from_shape_fn((size, 2), |_| StandardNormal.sample(&mut rng));
    Ok(normalize_max(&dist_self(&points.view(), Metric::SqEuclidean)?.view()))
}

/// Coupling of input `c_s` (rows) to the barycenter `c` (columns), and its GW loss.
fn coupling_to_barycenter(
    c_s: &ArrayView2<f64>,
    c: &ArrayView2<f64>,
    ps: &ArrayView1<f64>,
    p: &ArrayView1<f64>,
    cfg: &BarycenterConfig,
) -> Result<(Array2<f64>, f64)> {
    let sol = match cfg.solver {
        BarycenterSolver::Exact => {
            let inner = GromovConfig {
                loss: cfg.loss,
                max_iter: cfg.max_iter,
                tol: cfg.inner_tol,
                ..GromovConfig::default()
            };
            let sol = gromov_wasserstein(c_s, c, ps, p, &inner)?;
            (sol.plan, sol.value)
        }
        BarycenterSolver::Entropic { epsilon } => {
            let inner = EntropicGromovConfig {
                loss: cfg.loss,
                epsilon,
                max_iter: cfg.max_iter,
                tol: cfg.inner_tol,
                ..EntropicGromovConfig::default()
            };
            let sol = entropic_gromov_wasserstein(c_s, c, ps, p, &inner)?;
            (sol.plan, sol.value)
        }
    };
    Ok(sol)
}

/// GW barycenter of `size` points for `(structures[s], marginals[s])` weighted by `lambdas`.
///
/// - `p`: barycenter marginal, length `size`
/// - `lambdas`: nonnegative, summing to 1
///
/// The structure error is checked every 10 iterations and at the last one.
pub fn gromov_barycenters(
    size: usize,
    structures: &[ArrayView2<f64>],
    marginals: &[ArrayView1<f64>],
    p: &ArrayView1<f64>,
    lambdas: &[f64],
    cfg: &BarycenterConfig,
) -> Result<GwBarycenter> {
    validate_collection(size, structures, marginals, p, lambdas)?;
    validate_config(cfg)?;
    let mut c = initial_structure(size, cfg)?;
    for (c_s, ps) in structures.iter().zip(marginals) {
        validate_structures(c_s, &c.view(), ps, p)?;
    }

    let mut err_structure = Vec::new();
    let mut objective = Vec::new();
    let mut couplings = Vec::new();
    let mut converged = false;
    let mut iterations = 0usize;

    for it in 0..cfg.max_iter {
        iterations = it + 1;
        let solved = per_input(structures.len(), |s| {
            coupling_to_barycenter(&structures[s], &c.view(), &marginals[s], p, cfg)
        })?;
        let obj: f64 = solved.iter().zip(lambdas).map(|((_, d), l)| l * d).sum();
        let plans: Vec<Array2<f64>> = solved.into_iter().map(|(t, _)| t).collect();

        let next = cfg.loss.update_structure(p, lambdas, &plans, structures);
        let err = frobenius_distance(&next, &c);
        c = next;
        couplings = plans;
        objective.push(obj);

        if it % CHECK_EVERY == 0 || it + 1 == cfg.max_iter {
            err_structure.push(err);
            progress!(cfg.verbose, it, err, objective = obj, "gromov_barycenters");
            if err < cfg.tol {
                converged = true;
                break;
            }
        }
    }
    if !converged {
        tracing::warn!(max_iter = cfg.max_iter, "gromov_barycenters: iteration cap reached");
    }

    let log = cfg.log.then(|| BarycenterLog {
        err_structure,
        err_features: Vec::new(),
        objective,
        couplings,
        iterations,
        converged,
    });
    Ok(GwBarycenter { structure: c, log })
}

/// [`gromov_barycenters`] with entropic inner couplings of regularization `epsilon`.
pub fn entropic_gromov_barycenters(
    size: usize,
    structures: &[ArrayView2<f64>],
    marginals: &[ArrayView1<f64>],
    p: &ArrayView1<f64>,
    lambdas: &[f64],
    epsilon: f64,
    cfg: &BarycenterConfig,
) -> Result<GwBarycenter> {
    let cfg = BarycenterConfig {
        solver: BarycenterSolver::Entropic { epsilon },
        ..cfg.clone()
    };
    gromov_barycenters(size, structures, marginals, p, lambdas, &cfg)
}

/// FGW barycenter: features `size × d` and structure `size × size`.
///
/// - `features[s]`: `n_s × d` node features of input `s`
/// - `alpha`: structure weight in `[0, 1]`
///
/// Feature costs are squared Euclidean. Without `init_features` the features start at zero.
/// Stops when both the structure and the features move less than `tol`.
#[allow(clippy::too_many_arguments)]
pub fn fgw_barycenters(
    size: usize,
    features: &[ArrayView2<f64>],
    structures: &[ArrayView2<f64>],
    marginals: &[ArrayView1<f64>],
    p: &ArrayView1<f64>,
    lambdas: &[f64],
    alpha: f64,
    cfg: &BarycenterConfig,
) -> Result<FgwBarycenter> {
    validate_collection(size, structures, marginals, p, lambdas)?;
    validate_config(cfg)?;
    if cfg.solver != BarycenterSolver::Exact {
        return Err(Error::Domain("fgw_barycenters uses the exact inner solver only"));
    }
    if !(0.0..=1.0).contains(&alpha) {
        return Err(Error::Domain("alpha must be in [0, 1]"));
    }
    if features.len() != structures.len() {
        return Err(Error::DimensionMismatch("features and structures must have the same length"));
    }
    let d = features[0].ncols();
    if d == 0 {
        return Err(Error::DimensionMismatch("features must have at least one column"));
    }
    for (y, ps) in features.iter().zip(marginals) {
        if y.nrows() != ps.len() || y.ncols() != d {
            return Err(Error::DimensionMismatch("features[s] must have shape (len ps[s], d)"));
        }
    }
    if cfg.fixed_structure && cfg.init_structure.is_none() {
        return Err(Error::Domain("fixed_structure requires init_structure"));
    }
    if cfg.fixed_features && cfg.init_features.is_none() {
        return Err(Error::Domain("fixed_features requires init_features"));
    }

    let mut c = initial_structure(size, cfg)?;
    let mut x = match &cfg.init_features {
        Some(x0) if x0.dim() != (size, d) => {
            return Err(Error::DimensionMismatch("init_features must have shape (size, d)"));
        }
        Some(x0) => x0.clone(),
        None => Array2::zeros((size, d)),
    };
    for (c_s, ps) in structures.iter().zip(marginals) {
        validate_structures(&c.view(), c_s, p, ps)?;
    }
    let inner = GromovConfig {
        loss: cfg.loss,
        max_iter: cfg.max_iter,
        tol: cfg.inner_tol,
        ..GromovConfig::default()
    };

    let mut err_structure = Vec::new();
    let mut err_features = Vec::new();
    let mut objective = Vec::new();
    let mut couplings = Vec::new();
    let mut converged = false;
    let mut iterations = 0usize;

    for it in 0..cfg.max_iter {
        iterations = it + 1;
        // Couplings run barycenter (rows) to input (columns).
        let solved = per_input(structures.len(), |s| {
            let m = dist(&x.view(), &features[s], Metric::SqEuclidean)?;
            let sol = fused_gromov_wasserstein(
                &m.view(),
                &c.view(),
                &structures[s],
                p,
                &marginals[s],
                alpha,
                &inner,
            )?;
            Ok((sol.plan, sol.value))
        })?;
        let obj: f64 = solved.iter().zip(lambdas).map(|((_, d), l)| l * d).sum();
        let plans: Vec<Array2<f64>> = solved.into_iter().map(|(t, _)| t).collect();

        let err_c = if cfg.fixed_structure {
            0.0
        } else {
            let transposed: Vec<Array2<f64>> = plans.iter().map(|t| t.t().to_owned()).collect();
            let next = cfg.loss.update_structure(p, lambdas, &transposed, structures);
            let err = frobenius_distance(&next, &c);
            c = next;
            err
        };
        let err_x = if cfg.fixed_features {
            0.0
        } else {
            let mut next = Array2::<f64>::zeros((size, d));
            for ((t, y), &lambda) in plans.iter().zip(features).zip(lambdas) {
                next.scaled_add(lambda, &barycentric_features(&t.view(), y, p));
            }
            let err = frobenius_distance(&next, &x);
            x = next;
            err
        };
        couplings = plans;
        objective.push(obj);
        err_structure.push(err_c);
        err_features.push(err_x);
        progress!(
            cfg.verbose,
            it,
            err_structure = err_c,
            err_features = err_x,
            objective = obj,
            "fgw_barycenters"
        );

        if err_c < cfg.tol && err_x < cfg.tol {
            converged = true;
            break;
        }
    }
    if !converged {
        tracing::warn!(max_iter = cfg.max_iter, "fgw_barycenters: iteration cap reached");
    }

    let log = cfg.log.then(|| BarycenterLog {
        err_structure,
        err_features,
        objective,
        couplings,
        iterations,
        converged,
    });
    Ok(FgwBarycenter {
        features: x,
        structure: c,
        log,
    })
}
