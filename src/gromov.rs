//! Gromov-Wasserstein between two structures.
//!
//! \[
//! GW(C_1, C_2, p, q) = \min_{T \in \Pi(p, q)} \sum_{ijkl} L(C_{1,ik}, C_{2,jl})\, T_{ij} T_{kl}
//! \]
//!
//! - [`gromov_wasserstein`]: conditional gradient with exact linear subproblems (Mémoli 2011;
//!   Peyré et al. 2016). Non-convex: the result is a stationary point reached from `p qᵀ`.
//! - [`entropic_gromov_wasserstein`]: projected mirror descent where every step is a Sinkhorn
//!   solve with regularization `epsilon` on the current gradient.

use crate::cg::{cg, outer, shifted_nonnegative, validate_structures, CgLog, GromovConfig};
use crate::loss::{GwTensor, Loss};
use crate::sinkhorn::{sinkhorn, SinkhornConfig};
use crate::solution::{Diagnostics, Solution};
use crate::{Error, Result};
use ndarray::{ArrayView1, ArrayView2};

/// Outer iterations between two convergence checks of the entropic solver.
const CHECK_EVERY: usize = 10;

/// Exact-step Gromov-Wasserstein coupling.
///
/// `value` is the GW loss of the returned plan.
pub fn gromov_wasserstein(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    cfg: &GromovConfig,
) -> Result<Solution<CgLog>> {
    validate_structures(c1, c2, p, q)?;
    cfg.validate()?;
    let tensor = GwTensor::new(c1, c2, p, q, &cfg.loss);
    let out = cg(p, q, None, 1.0, &tensor, cfg, "gromov_wasserstein")?;
    Ok(Solution {
        plan: out.plan,
        value: out.value,
        log: cfg.log.then_some(out.log),
    })
}

/// GW loss only (see [`gromov_wasserstein`]).
pub fn gromov_wasserstein2(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    cfg: &GromovConfig,
) -> Result<f64> {
    Ok(gromov_wasserstein(c1, c2, p, q, cfg)?.value)
}

/// Configuration of entropic Gromov-Wasserstein.
#[derive(Debug, Clone)]
pub struct EntropicGromovConfig {
    pub loss: Loss,
    /// Entropic regularization of every inner Sinkhorn solve.
    pub epsilon: f64,
    pub max_iter: usize,
    /// Stop when `‖T - T_prev‖_F` or the relative objective change falls below this.
    pub tol: f64,
    /// Inner Sinkhorn settings (`log` / `verbose` there are ignored).
    pub inner: SinkhornConfig,
    pub verbose: bool,
    pub log: bool,
}

impl Default for EntropicGromovConfig {
    fn default() -> Self {
        Self {
            loss: Loss::Square,
            epsilon: 1e-1,
            max_iter: 1000,
            tol: 1e-9,
            inner: SinkhornConfig::stabilized(),
            verbose: false,
            log: false,
        }
    }
}

/// Diagnostics of entropic GW.
#[derive(Debug, Clone)]
pub struct EntropicGromovLog {
    /// `‖T - T_prev‖_F` at each check.
    pub err: Vec<f64>,
    /// GW loss at each check.
    pub loss: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// GW loss of the returned plan.
    pub gw_dist: f64,
}

impl Diagnostics for EntropicGromovLog {
    fn converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Entropic Gromov-Wasserstein coupling (Peyré, Cuturi, Solomon 2016).
///
/// `value` is the (unregularized) GW loss of the returned plan.
pub fn entropic_gromov_wasserstein(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    cfg: &EntropicGromovConfig,
) -> Result<Solution<EntropicGromovLog>> {
    validate_structures(c1, c2, p, q)?;
    if !(cfg.epsilon > 0.0) || !cfg.epsilon.is_finite() {
        return Err(Error::Domain("epsilon must be positive and finite"));
    }
    if !(cfg.tol >= 0.0) || !cfg.tol.is_finite() {
        return Err(Error::Domain("tol must be finite and >= 0"));
    }
    if cfg.max_iter == 0 {
        return Err(Error::Domain("max_iter must be >= 1"));
    }
    let inner = SinkhornConfig {
        log: false,
        verbose: false,
        ..cfg.inner.clone()
    };

    let tensor = GwTensor::new(c1, c2, p, q, &cfg.loss);
    let mut t = outer(p, q);
    let mut prev_loss = tensor.loss(&t.view());
    let mut errs = Vec::new();
    let mut losses = Vec::new();
    let mut converged = false;
    let mut iterations = 0usize;

    for it in 0..cfg.max_iter {
        iterations = it + 1;
        let t_prev = t.clone();

        let grad = shifted_nonnegative(tensor.gradient(&t.view()))?;
        t = sinkhorn(p, q, &grad.view(), cfg.epsilon, &inner)?.plan;

        if it % CHECK_EVERY == 0 || it + 1 == cfg.max_iter {
            let err = (&t - &t_prev).mapv(|x| x * x).sum().sqrt();
            let loss = tensor.loss(&t.view());
            let rel = if loss != 0.0 {
                (loss - prev_loss).abs() / loss.abs()
            } else {
                (loss - prev_loss).abs()
            };
            prev_loss = loss;
            errs.push(err);
            losses.push(loss);
            progress!(cfg.verbose, it, err, loss, "entropic_gromov_wasserstein");
            if err < cfg.tol || rel < cfg.tol {
                converged = true;
                break;
            }
        }
    }
    if !converged {
        tracing::warn!(max_iter = cfg.max_iter, "entropic_gromov_wasserstein: iteration cap reached");
    }

    let value = tensor.loss(&t.view());
    let log = cfg.log.then(|| EntropicGromovLog {
        err: errs,
        loss: losses,
        iterations,
        converged,
        gw_dist: value,
    });
    Ok(Solution {
        plan: t,
        value,
        log,
    })
}

/// GW loss of the entropic coupling (see [`entropic_gromov_wasserstein`]).
pub fn entropic_gromov_wasserstein2(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    cfg: &EntropicGromovConfig,
) -> Result<f64> {
    Ok(entropic_gromov_wasserstein(c1, c2, p, q, cfg)?.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{dist_self, normalize_max, Metric};
    use crate::simplex::{plan_marginal_error, uniform};
    use ndarray::{array, s, Array2};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, StandardNormal};

    fn mirrored(n: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let xs: Array2<f64> = Array2::from_shape_fn((n, 2), |_| StandardNormal.sample(&mut rng));
        let xt = xs.slice(s![..;-1, ..]).to_owned();
        let c1 = normalize_max(&dist_self(&xs.view(), Metric::SqEuclidean).unwrap().view());
        let c2 = normalize_max(&dist_self(&xt.view(), Metric::SqEuclidean).unwrap().view());
        (c1, c2)
    }

    #[test]
    fn mirrored_cloud_is_matched_by_the_flip() {
        let n = 12;
        let (c1, c2) = mirrored(n, 7);
        let p = uniform(n);
        let cfg = GromovConfig {
            log: true,
            ..GromovConfig::default()
        };
        let sol = gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();
        assert!(sol.value.abs() < 1e-9, "gw={}", sol.value);
        for i in 0..n {
            assert!((sol.plan[[i, n - 1 - i]] - 1.0 / n as f64).abs() < 1e-6);
        }
        assert_eq!(sol.converged(), Some(true));
        let log = sol.log.unwrap();
        assert!(log.loss.windows(2).all(|w| w[1] <= w[0] + 1e-12));
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let (c1, c2) = mirrored(8, 3);
        let p = uniform(8);
        let cfg = GromovConfig::default();
        let a = gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();
        let b = gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();
        assert_eq!(a.plan, b.plan);
        assert_eq!(a.value, b.value);
    }

    #[test]
    fn shape_errors_come_before_iterating() {
        let c1 = array![[0.0, 1.0], [1.0, 0.0]];
        let c2 = array![[0.0, 1.0, 2.0], [1.0, 0.0, 1.0], [2.0, 1.0, 0.0]];
        let p = uniform(2);
        let q = uniform(3);
        let cfg = GromovConfig::default();
        assert!(matches!(
            gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg),
            Err(Error::DimensionMismatch(_))
        ));
        let rect = array![[0.0, 1.0, 2.0], [1.0, 0.0, 1.0]];
        assert!(gromov_wasserstein(&rect.view(), &c2.view(), &p.view(), &q.view(), &cfg).is_err());
        let bad = GromovConfig {
            max_iter: 0,
            ..GromovConfig::default()
        };
        assert!(matches!(
            gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &q.view(), &bad),
            Err(Error::Domain(_))
        ));
    }

    #[test]
    fn rectangular_problem_respects_marginals() {
        let (c1, _) = mirrored(9, 11);
        let (c2, _) = mirrored(6, 12);
        let p = uniform(9);
        let q = array![0.1, 0.2, 0.3, 0.1, 0.2, 0.1];
        for loss in [Loss::Square, Loss::Kl] {
            let cfg = GromovConfig {
                loss,
                ..GromovConfig::default()
            };
            let sol = gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &q.view(), &cfg).unwrap();
            let err = plan_marginal_error(&sol.plan.view(), &p.view(), &q.view()).unwrap();
            assert!(err < 1e-9, "{loss:?}: err={err}");
            assert!(sol.plan.iter().all(|&g| g >= -1e-15));
        }
    }

    #[test]
    fn entropic_mirror_has_small_distance() {
        let n = 20;
        let (c1, c2) = mirrored(n, 5);
        let p = uniform(n);
        let cfg = EntropicGromovConfig {
            epsilon: 1e-2,
            max_iter: 50,
            log: true,
            ..EntropicGromovConfig::default()
        };
        let sol =
            entropic_gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();
        assert!(sol.value < 0.1, "gw={}", sol.value);
        let err = plan_marginal_error(&sol.plan.view(), &p.view(), &p.view()).unwrap();
        assert!(err < 1e-4, "err={err}");
        assert_eq!(sol.log.as_ref().map(|l| l.gw_dist), Some(sol.value));
    }

    #[test]
    fn entropic_rejects_bad_epsilon() {
        let (c1, c2) = mirrored(4, 1);
        let p = uniform(4);
        let cfg = EntropicGromovConfig {
            epsilon: -1.0,
            ..EntropicGromovConfig::default()
        };
        assert!(matches!(
            entropic_gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg),
            Err(Error::Domain(_))
        ));
    }
}
