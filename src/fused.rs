//! Fused Gromov-Wasserstein (Vayer et al. 2019).
//!
//! \[
//! FGW_\alpha = \min_{T \in \Pi(p, q)} (1-\alpha)\langle T, M\rangle
//!   + \alpha \sum_{ijkl} L(C_{1,ik}, C_{2,jl})\, T_{ij} T_{kl}
//! \]
//!
//! Solved with the same conditional-gradient loop as [`crate::gromov_wasserstein`]. The two
//! ends of `alpha` are the plain problems: `alpha = 0` is exact transport on `M`, `alpha = 1`
//! is GW on `(C1, C2)`, and both are dispatched to those solvers directly.

use crate::cg::{cg, validate_structures, CgLog, GromovConfig};
use crate::cost::validate_cost;
use crate::emd::emd;
use crate::loss::GwTensor;
use crate::solution::Solution;
use crate::{Error, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// FGW coupling between `(M, C1, p)` and `(C2, q)` with structure weight `alpha`.
///
/// - `m`: feature cost, `len p × len q`
/// - `c1`, `c2`: structures
///
/// `value` is the FGW objective of the returned plan.
pub fn fused_gromov_wasserstein(
    m: &ArrayView2<f64>,
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    alpha: f64,
    cfg: &GromovConfig,
) -> Result<Solution<CgLog>> {
    validate_structures(c1, c2, p, q)?;
    validate_cost(m, p.len(), q.len())?;
    cfg.validate()?;
    if !(0.0..=1.0).contains(&alpha) {
        return Err(Error::Domain("alpha must be in [0, 1]"));
    }

    if alpha == 0.0 {
        let sol = emd(p, q, m, cfg.log)?;
        let log = sol.log.map(|l| CgLog {
            loss: vec![sol.value],
            steps: vec![1.0],
            iterations: 1,
            converged: true,
            u: l.u,
            v: l.v,
        });
        return Ok(Solution {
            plan: sol.plan,
            value: sol.value,
            log,
        });
    }

    let tensor = GwTensor::new(c1, c2, p, q, &cfg.loss);
    let linear = (alpha < 1.0).then(|| m.mapv(|x| (1.0 - alpha) * x));
    let out = cg(p, q, linear.as_ref(), alpha, &tensor, cfg, "fused_gromov_wasserstein")?;
    Ok(Solution {
        plan: out.plan,
        value: out.value,
        log: cfg.log.then_some(out.log),
    })
}

/// FGW objective only (see [`fused_gromov_wasserstein`]).
pub fn fused_gromov_wasserstein2(
    m: &ArrayView2<f64>,
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    alpha: f64,
    cfg: &GromovConfig,
) -> Result<f64> {
    Ok(fused_gromov_wasserstein(m, c1, c2, p, q, alpha, cfg)?.value)
}

/// `(1-α)⟨T, M⟩` and `α·GW(T)` of a plan, reported separately.
#[allow(clippy::too_many_arguments)]
pub fn fgw_terms(
    plan: &ArrayView2<f64>,
    m: &ArrayView2<f64>,
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    alpha: f64,
    cfg: &GromovConfig,
) -> Result<(f64, f64)> {
    validate_structures(c1, c2, p, q)?;
    validate_cost(m, p.len(), q.len())?;
    if plan.dim() != m.dim() {
        return Err(Error::DimensionMismatch("plan shape must be (len p, len q)"));
    }
    let tensor = GwTensor::new(c1, c2, p, q, &cfg.loss);
    let feature: f64 = plan.iter().zip(m.iter()).map(|(t, c)| t * c).sum();
    Ok(((1.0 - alpha) * feature, alpha * tensor.loss(plan)))
}

/// Feature matrix `Ys` transported to a support weighted by `p`: `diag(1/p) · T · Ys`.
pub(crate) fn barycentric_features(
    plan: &ArrayView2<f64>,
    features: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
) -> ndarray::Array2<f64> {
    let mut x = plan.dot(features);
    let inv: Array1<f64> = p.mapv(|w| if w > 0.0 { 1.0 / w } else { 0.0 });
    for (mut row, s) in x.rows_mut().into_iter().zip(inv.iter()) {
        row *= *s;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{dist, dist_self, normalize_max, Metric};
    use crate::gromov::gromov_wasserstein;
    use crate::simplex::{plan_marginal_error, uniform};
    use ndarray::{s, Array2};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, StandardNormal};

    struct Graphs {
        m: Array2<f64>,
        c1: Array2<f64>,
        c2: Array2<f64>,
    }

    fn graphs(n: usize, seed: u64) -> Graphs {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let xs: Array2<f64> = Array2::from_shape_fn((n, 2), |_| StandardNormal.sample(&mut rng));
        let xt = xs.slice(s![..;-1, ..]).to_owned();
        let ys: Array2<f64> = Array2::from_shape_fn((n, 1), |_| StandardNormal.sample(&mut rng));
        let yt: Array2<f64> = Array2::from_shape_fn((n, 1), |_| StandardNormal.sample(&mut rng));
        Graphs {
            m: dist(&ys.view(), &yt.view(), Metric::SqEuclidean).unwrap(),
            c1: normalize_max(&dist_self(&xs.view(), Metric::SqEuclidean).unwrap().view()),
            c2: normalize_max(&dist_self(&xt.view(), Metric::SqEuclidean).unwrap().view()),
        }
    }

    #[test]
    fn alpha_zero_is_exact_transport_on_features() {
        let g = graphs(10, 1);
        let p = uniform(10);
        let cfg = GromovConfig::default();
        let fgw = fused_gromov_wasserstein(
            &g.m.view(),
            &g.c1.view(),
            &g.c2.view(),
            &p.view(),
            &p.view(),
            0.0,
            &cfg,
        )
        .unwrap();
        let ot = emd(&p.view(), &p.view(), &g.m.view(), false).unwrap();
        for (x, y) in fgw.plan.iter().zip(ot.plan.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
        assert!((fgw.value - ot.value).abs() < 1e-12);
    }

    #[test]
    fn alpha_one_is_gromov_wasserstein() {
        let g = graphs(10, 2);
        let p = uniform(10);
        let cfg = GromovConfig::default();
        let fgw = fused_gromov_wasserstein(
            &g.m.view(),
            &g.c1.view(),
            &g.c2.view(),
            &p.view(),
            &p.view(),
            1.0,
            &cfg,
        )
        .unwrap();
        let gw = gromov_wasserstein(&g.c1.view(), &g.c2.view(), &p.view(), &p.view(), &cfg).unwrap();
        assert_eq!(fgw.plan, gw.plan);
        assert_eq!(fgw.value, gw.value);
    }

    #[test]
    fn intermediate_alpha_balances_both_terms() {
        let g = graphs(12, 3);
        let p = uniform(12);
        let cfg = GromovConfig {
            log: true,
            ..GromovConfig::default()
        };
        let alpha = 0.5;
        let sol = fused_gromov_wasserstein(
            &g.m.view(),
            &g.c1.view(),
            &g.c2.view(),
            &p.view(),
            &p.view(),
            alpha,
            &cfg,
        )
        .unwrap();
        let err = plan_marginal_error(&sol.plan.view(), &p.view(), &p.view()).unwrap();
        assert!(err < 1e-9);
        let (feat, structure) = fgw_terms(
            &sol.plan.view(),
            &g.m.view(),
            &g.c1.view(),
            &g.c2.view(),
            &p.view(),
            &p.view(),
            alpha,
            &cfg,
        )
        .unwrap();
        assert!((feat + structure - sol.value).abs() < 1e-9);
        // Never worse than the starting product plan.
        let log = sol.log.unwrap();
        assert!(sol.value <= log.loss[0] + 1e-12);
    }

    #[test]
    fn alpha_out_of_range_is_rejected() {
        let g = graphs(4, 4);
        let p = uniform(4);
        for alpha in [-0.1, 1.5, f64::NAN] {
            assert!(matches!(
                fused_gromov_wasserstein(
                    &g.m.view(),
                    &g.c1.view(),
                    &g.c2.view(),
                    &p.view(),
                    &p.view(),
                    alpha,
                    &GromovConfig::default(),
                ),
                Err(Error::Domain(_))
            ));
        }
    }

    #[test]
    fn barycentric_features_average_through_the_plan() {
        let p = uniform(2);
        let plan = ndarray::array![[0.5, 0.0], [0.25, 0.25]];
        let ys = ndarray::array![[2.0], [4.0]];
        let x = barycentric_features(&plan.view(), &ys.view(), &p.view());
        assert!((x[[0, 0]] - 2.0).abs() < 1e-15);
        assert!((x[[1, 0]] - 3.0).abs() < 1e-15);
    }
}
