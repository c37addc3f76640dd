use gwot::simplex::plan_marginal_error;
use gwot::{
    dist_self, entropic_gromov_wasserstein, gromov_wasserstein, gromov_wasserstein2, uniform,
    EntropicGromovConfig, GromovConfig, Loss, Metric,
};
use ndarray::{s, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// A Gaussian cloud and the same cloud listed in reverse order, as max-normalized structures.
fn mirrored_clouds(n: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let xs: Array2<f64> = Array2::from_shape_fn((n, 2), |_| StandardNormal.sample(&mut rng));
    let xt = xs.slice(s![..;-1, ..]).to_owned();
    let c1 = dist_self(&xs.view(), Metric::SqEuclidean).unwrap();
    let c2 = dist_self(&xt.view(), Metric::SqEuclidean).unwrap();
    let max = c1.iter().copied().fold(0.0, f64::max);
    (c1 / max, c2 / max)
}

#[test]
fn exact_gw_recovers_the_reversal() {
    let n = 50;
    let (c1, c2) = mirrored_clouds(n, 42);
    let p = uniform(n);
    let cfg = GromovConfig {
        log: true,
        ..GromovConfig::default()
    };

    let sol = gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();

    let err = plan_marginal_error(&sol.plan.view(), &p.view(), &p.view()).unwrap();
    assert!(err < 1e-9, "marginal error {err}");
    for i in 0..n {
        assert!(sol.plan[[i, n - 1 - i]] > 0.99 / n as f64, "row {i} is not mirrored");
    }
    assert!(sol.value.abs() < 1e-8, "value {}", sol.value);

    let log = sol.log.as_ref().unwrap();
    assert!(log.converged);
    for w in log.loss.windows(2) {
        assert!(w[1] <= w[0] + 1e-12);
    }

    let value = gromov_wasserstein2(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();
    assert_eq!(value, sol.value);
}

#[test]
fn kl_loss_keeps_marginals_and_matches_the_mirror() {
    let n = 50;
    let (c1, c2) = mirrored_clouds(n, 42);
    let p = uniform(n);
    let cfg = GromovConfig {
        loss: Loss::Kl,
        ..GromovConfig::default()
    };

    let sol = gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();
    let err = plan_marginal_error(&sol.plan.view(), &p.view(), &p.view()).unwrap();
    assert!(err < 1e-9);
    assert!(sol.value.is_finite());
    assert!(sol.value < 0.1, "kl gw={}", sol.value);
}

#[test]
fn entropic_gw_is_feasible_and_improves_on_the_product_plan() {
    let n = 30;
    let (c1, c2) = mirrored_clouds(n, 3);
    let p = uniform(n);
    let cfg = EntropicGromovConfig {
        epsilon: 1e-2,
        max_iter: 50,
        log: true,
        ..EntropicGromovConfig::default()
    };

    let sol = entropic_gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &p.view(), &cfg).unwrap();
    let err = plan_marginal_error(&sol.plan.view(), &p.view(), &p.view()).unwrap();
    assert!(err < 1e-4, "marginal error {err}");

    let product = gwot::loss::GwTensor::new(&c1.view(), &c2.view(), &p.view(), &p.view(), &Loss::Square);
    let start = product.loss(&Array2::from_elem((n, n), 1.0 / (n * n) as f64).view());
    assert!(sol.value < start);
    assert_eq!(sol.log.as_ref().map(|l| l.gw_dist), Some(sol.value));
}

#[test]
fn solvers_reject_mismatched_shapes() {
    let (c1, c2) = mirrored_clouds(6, 1);
    let p = uniform(5);
    let q = uniform(6);
    let cfg = GromovConfig::default();
    assert!(matches!(
        gromov_wasserstein(&c1.view(), &c2.view(), &p.view(), &q.view(), &cfg),
        Err(gwot::Error::DimensionMismatch(_))
    ));
}
