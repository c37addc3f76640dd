//! Stochastic Gromov-Wasserstein (Kerdoncuff, Emonet, Sebban 2021).
//!
//! Both solvers avoid the `O(n³)` tensor contraction by sampling:
//!
//! - [`pointwise_gromov_wasserstein`] (PoGroW): at every step, sample one row `k ~ p` and one
//!   column `l ~ T[k, :]`, and replace (or blend) the plan with the exact 1-D coupling between
//!   row `C1[k, :]` and row `C2[l, :]`. The plan stays row-sparse ([`SparsePlan`]) until the
//!   final dense conversion.
//! - [`sampled_gromov_wasserstein`] (SaGroW): estimate the GW gradient from a mini-batch of
//!   `(i, l)` pairs drawn from `p` and the current plan, then take an entropic (or exact) step
//!   on the estimated gradient.
//!
//! Randomness: every sample is drawn from an explicit RNG. The plain entry points seed a
//! `ChaCha8Rng` from `config.seed`; the `*_with_rng` variants take the caller's generator.
//! Same inputs and same seed give bit-identical outputs.
//!
//! Structures need not be symmetric here.

use crate::cg::{outer, validate_structures};
use crate::cost::is_symmetric;
use crate::emd::{emd, emd_1d};
use crate::pairwise::PairwiseLoss;
use crate::sinkhorn::{sinkhorn, SinkhornConfig};
use crate::solution::{Diagnostics, Solution};
use crate::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Iterations between two distance estimates of the pointwise solver.
const CHECK_EVERY: usize = 10;
/// Symmetry tolerance for the sampled gradient.
const SYMMETRY_TOL: f64 = 1e-10;
/// Mean squared plan change below which a sampled step counts as stagnant.
const STAGNATION_CHANGE: f64 = 1e-19;
/// Consecutive stagnant steps before the sampled solver stops.
const STAGNATION_PATIENCE: usize = 100;
/// Floor of plan entries inside the entropic proximal term (`ln` is clipped at `-200`).
const LOG_PLAN_FLOOR: f64 = -200.0;

/// Row-sparse coupling. Each row holds `(column, mass)` sorted by column.
#[derive(Debug, Clone, PartialEq)]
pub struct SparsePlan {
    rows: Vec<Vec<(usize, f64)>>,
    ncols: usize,
}

impl SparsePlan {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            rows: vec![Vec::new(); nrows],
            ncols,
        }
    }

    /// Build from `(row, column, mass)` triples; duplicates are summed.
    pub fn from_triples(nrows: usize, ncols: usize, triples: &[(usize, usize, f64)]) -> Self {
        let mut plan = Self::zeros(nrows, ncols);
        for &(i, j, g) in triples {
            debug_assert!(i < nrows && j < ncols);
            plan.rows[i].push((j, g));
        }
        for row in &mut plan.rows {
            row.sort_by_key(|&(j, _)| j);
            row.dedup_by(|next, kept| {
                if next.0 == kept.0 {
                    kept.1 += next.1;
                    true
                } else {
                    false
                }
            });
        }
        plan
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.ncols)
    }

    pub fn row(&self, i: usize) -> &[(usize, f64)] {
        &self.rows[i]
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// `self ← (1 - alpha)·self + alpha·other`.
    pub fn blend(&mut self, other: &SparsePlan, alpha: f64) {
        debug_assert_eq!(self.shape(), other.shape());
        for (row, orow) in self.rows.iter_mut().zip(&other.rows) {
            let mut merged = Vec::with_capacity(row.len() + orow.len());
            let (mut a, mut b) = (0usize, 0usize);
            while a < row.len() || b < orow.len() {
                let ja = row.get(a).map_or(usize::MAX, |e| e.0);
                let jb = orow.get(b).map_or(usize::MAX, |e| e.0);
                if ja == jb {
                    merged.push((ja, (1.0 - alpha) * row[a].1 + alpha * orow[b].1));
                    a += 1;
                    b += 1;
                } else if ja < jb {
                    merged.push((ja, (1.0 - alpha) * row[a].1));
                    a += 1;
                } else {
                    merged.push((jb, alpha * orow[b].1));
                    b += 1;
                }
            }
            *row = merged;
        }
    }

    /// Drop entries below `threshold` (and exact zeros).
    pub fn prune(&mut self, threshold: f64) {
        for row in &mut self.rows {
            row.retain(|&(_, g)| g > 0.0 && g >= threshold);
        }
    }

    pub fn transpose(&self) -> SparsePlan {
        let mut t = Self::zeros(self.ncols, self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, g) in row {
                t.rows[j].push((i, g));
            }
        }
        t
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::<f64>::zeros(self.shape());
        for (i, row) in self.rows.iter().enumerate() {
            for &(j, g) in row {
                dense[[i, j]] = g;
            }
        }
        dense
    }
}

/// Row access for column sampling.
trait PlanRows {
    fn nrows(&self) -> usize;
    /// Nonzero `(column, mass)` entries of row `i`.
    fn row_entries(&self, i: usize) -> Vec<(usize, f64)>;
}

impl PlanRows for ArrayView2<'_, f64> {
    fn nrows(&self) -> usize {
        self.dim().0
    }

    fn row_entries(&self, i: usize) -> Vec<(usize, f64)> {
        self.row(i)
            .iter()
            .enumerate()
            .filter(|(_, g)| **g > 0.0)
            .map(|(j, g)| (j, *g))
            .collect()
    }
}

impl PlanRows for SparsePlan {
    fn nrows(&self) -> usize {
        self.rows.len()
    }

    fn row_entries(&self, i: usize) -> Vec<(usize, f64)> {
        self.rows[i].iter().copied().filter(|&(_, g)| g > 0.0).collect()
    }
}

fn sampling_error<E>(_: E) -> Error {
    Error::Domain("invalid sampling weights")
}

/// One index drawn with probability proportional to `weights`.
fn choice<R: Rng + ?Sized>(weights: &ArrayView1<f64>, rng: &mut R) -> Result<usize> {
    let dist = WeightedIndex::new(weights.iter().copied()).map_err(sampling_error)?;
    Ok(dist.sample(rng))
}

/// `amount` distinct indices drawn proportionally to `weights` (clamped to the nonzero count).
fn choice_without_replacement<R: Rng + ?Sized>(
    weights: &[f64],
    amount: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    let nonzero = weights.iter().filter(|&&w| w > 0.0).count();
    let amount = amount.min(nonzero);
    if amount == 0 {
        return Ok(Vec::new());
    }
    let idx = rand::seq::index::sample_weighted(rng, weights.len(), |i| weights[i], amount)
        .map_err(sampling_error)?;
    Ok(idx.into_vec())
}

/// Columns for row `i` of `plan`, drawn with replacement; falls back to `q` on an empty row.
fn sample_columns<P: PlanRows, R: Rng + ?Sized>(
    plan: &P,
    i: usize,
    q: &ArrayView1<f64>,
    amount: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    let entries = plan.row_entries(i);
    if entries.is_empty() {
        let dist = WeightedIndex::new(q.iter().copied()).map_err(sampling_error)?;
        return Ok((0..amount).map(|_| dist.sample(rng)).collect());
    }
    let dist = WeightedIndex::new(entries.iter().map(|e| e.1)).map_err(sampling_error)?;
    Ok((0..amount).map(|_| entries[dist.sample(rng)].0).collect())
}

#[inline]
fn checked_loss<L: PairwiseLoss + ?Sized>(loss: &L, a: f64, b: f64) -> Result<f64> {
    let v = loss.eval(a, b);
    if !v.is_finite() {
        return Err(Error::NumericalInstability("pairwise loss returned a non-finite value"));
    }
    Ok(v)
}

/// Estimation core. `swapped` means `(c1, p)` and `(c2, q)` were exchanged by the caller, so
/// the loss arguments are exchanged back.
#[allow(clippy::too_many_arguments)]
fn estimate<L, P, R>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    plan: &P,
    nb_p: usize,
    nb_q: usize,
    swapped: bool,
    with_std: bool,
    rng: &mut R,
) -> Result<(f64, f64)>
where
    L: PairwiseLoss + ?Sized,
    P: PlanRows,
    R: Rng + ?Sized,
{
    debug_assert_eq!(plan.nrows(), p.len());
    let pw = p.to_vec();
    let index_i = choice_without_replacement(&pw, nb_p, rng)?;
    let index_j = choice_without_replacement(&pw, nb_p, rng)?;
    let nb_p = index_i.len();

    let mut index_k = Vec::with_capacity(nb_p);
    let mut index_l = Vec::with_capacity(nb_p);
    for a in 0..nb_p {
        index_k.push(sample_columns(plan, index_i[a], q, nb_q, rng)?);
        index_l.push(sample_columns(plan, index_j[a], q, nb_q, rng)?);
    }

    let mut total = 0.0f64;
    let mut var_total = 0.0f64;
    let mut values = vec![0.0f64; nb_q];
    for a in 0..nb_p {
        for b in 0..nb_p {
            let x = c1[[index_i[a], index_j[b]]];
            for (n, v) in values.iter_mut().enumerate() {
                let y = c2[[index_k[a][n], index_l[b][n]]];
                *v = if swapped {
                    checked_loss(loss, y, x)?
                } else {
                    checked_loss(loss, x, y)?
                };
            }
            let sum: f64 = values.iter().sum();
            total += sum;
            if with_std {
                let mean = sum / nb_q as f64;
                var_total += values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / nb_q as f64;
            }
        }
    }
    let count = (nb_p * nb_p * nb_q) as f64;
    let std = if with_std {
        var_total.sqrt() / (nb_p * nb_p) as f64
    } else {
        0.0
    };
    Ok((total / count, std))
}

fn default_samples_q(nb_samples_q: Option<usize>, with_std: bool) -> usize {
    let nb_q = nb_samples_q.unwrap_or(1).max(1);
    if with_std {
        nb_q.max(2)
    } else {
        nb_q
    }
}

/// Monte-Carlo estimate of the GW loss of `plan`, with its standard deviation.
///
/// Rows are drawn without replacement from `p` (`nb_samples_p`, default `len p`), and for each
/// sampled row `nb_samples_q` columns (default 1, at least 2 when `with_std`) are drawn from the
/// plan row. Sampling always starts on the larger side. The standard deviation is `0` when
/// `with_std` is `false`.
#[allow(clippy::too_many_arguments)]
pub fn gw_distance_estimation<L, R>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    plan: &ArrayView2<f64>,
    nb_samples_p: Option<usize>,
    nb_samples_q: Option<usize>,
    with_std: bool,
    rng: &mut R,
) -> Result<(f64, f64)>
where
    L: PairwiseLoss + ?Sized,
    R: Rng + ?Sized,
{
    validate_structures(c1, c2, p, q)?;
    if plan.dim() != (p.len(), q.len()) {
        return Err(Error::DimensionMismatch("plan shape must be (len p, len q)"));
    }
    if plan.iter().any(|&g| !g.is_finite() || g < 0.0) {
        return Err(Error::Degenerate("plan must be finite and nonnegative"));
    }
    dense_estimation(c1, c2, p, q, loss, plan, nb_samples_p, nb_samples_q, with_std, rng)
}

#[allow(clippy::too_many_arguments)]
fn dense_estimation<L, R>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    plan: &ArrayView2<f64>,
    nb_samples_p: Option<usize>,
    nb_samples_q: Option<usize>,
    with_std: bool,
    rng: &mut R,
) -> Result<(f64, f64)>
where
    L: PairwiseLoss + ?Sized,
    R: Rng + ?Sized,
{
    let nb_q = default_samples_q(nb_samples_q, with_std);
    if p.len() < q.len() {
        let nb_p = nb_samples_p.unwrap_or(q.len()).clamp(1, q.len());
        let t = plan.t();
        estimate(c2, c1, q, p, loss, &t, nb_p, nb_q, true, with_std, rng)
    } else {
        let nb_p = nb_samples_p.unwrap_or(p.len()).clamp(1, p.len());
        estimate(c1, c2, p, q, loss, plan, nb_p, nb_q, false, with_std, rng)
    }
}

/// Estimate for a sparse plan; the default row count is reduced to `5·sqrt(n ln n)`.
#[allow(clippy::too_many_arguments)]
fn sparse_estimation<L, R>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    plan: &SparsePlan,
    with_std: bool,
    rng: &mut R,
) -> Result<(f64, f64)>
where
    L: PairwiseLoss + ?Sized,
    R: Rng + ?Sized,
{
    let reduced = |n: usize| {
        let nf = n as f64;
        ((5.0 * (nf * nf.ln()).sqrt()) as usize).clamp(1, n)
    };
    let nb_q = default_samples_q(None, with_std);
    if p.len() < q.len() {
        let t = plan.transpose();
        estimate(c2, c1, q, p, loss, &t, reduced(q.len()), nb_q, true, with_std, rng)
    } else {
        estimate(c1, c2, p, q, loss, plan, reduced(p.len()), nb_q, false, with_std, rng)
    }
}

/// Pointwise GW configuration.
#[derive(Debug, Clone)]
pub struct PointwiseGromovConfig {
    /// Step of the plan update (`1` replaces the plan at every iteration).
    pub alpha: f64,
    pub max_iter: usize,
    /// Entries below this are pruned after a blended update.
    pub threshold_plan: f64,
    pub seed: u64,
    pub verbose: bool,
    pub log: bool,
}

impl Default for PointwiseGromovConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iter: 100,
            threshold_plan: 0.0,
            seed: 0,
            verbose: false,
            log: false,
        }
    }
}

/// Sampled GW configuration.
#[derive(Debug, Clone)]
pub struct SampledGromovConfig {
    /// Gradient samples per iteration. Rows are sampled without replacement, so past `len p`
    /// the surplus is moved to columns per row.
    pub nb_samples_grad: usize,
    /// Explicit `(rows, columns per row)` split, overriding `nb_samples_grad`.
    pub grad_samples: Option<(usize, usize)>,
    /// Entropic step size; `0` takes exact (EMD) steps.
    pub epsilon: f64,
    pub max_iter: usize,
    /// Inner Sinkhorn settings for `epsilon > 0`.
    pub inner: SinkhornConfig,
    pub seed: u64,
    pub verbose: bool,
    pub log: bool,
}

impl Default for SampledGromovConfig {
    fn default() -> Self {
        Self {
            nb_samples_grad: 100,
            grad_samples: None,
            epsilon: 1.0,
            max_iter: 500,
            inner: SinkhornConfig::default(),
            seed: 0,
            verbose: false,
            log: false,
        }
    }
}

/// Diagnostics of the stochastic solvers.
#[derive(Debug, Clone)]
pub struct StochasticLog {
    pub gw_dist_estimated: f64,
    pub gw_dist_std: f64,
    /// Intermediate estimates (pointwise solver, every [`CHECK_EVERY`] iterations).
    pub estimates: Vec<f64>,
    pub iterations: usize,
    /// Pointwise: always `true` (fixed budget). Sampled: stopped on plan stagnation.
    pub converged: bool,
}

impl Diagnostics for StochasticLog {
    fn converged(&self) -> bool {
        self.converged
    }

    fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Pointwise GW, seeded from `cfg.seed`.
///
/// `value` is the estimated GW loss of the returned plan.
pub fn pointwise_gromov_wasserstein<L: PairwiseLoss + ?Sized>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    cfg: &PointwiseGromovConfig,
) -> Result<Solution<StochasticLog>> {
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    pointwise_gromov_wasserstein_with_rng(c1, c2, p, q, loss, cfg, &mut rng)
}

/// Pointwise GW with a caller-supplied RNG (`cfg.seed` is ignored).
pub fn pointwise_gromov_wasserstein_with_rng<L, R>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    cfg: &PointwiseGromovConfig,
    rng: &mut R,
) -> Result<Solution<StochasticLog>>
where
    L: PairwiseLoss + ?Sized,
    R: Rng + ?Sized,
{
    validate_structures(c1, c2, p, q)?;
    if !(cfg.alpha > 0.0 && cfg.alpha <= 1.0) {
        return Err(Error::Domain("alpha must be in (0, 1]"));
    }
    if !(cfg.threshold_plan >= 0.0) || !cfg.threshold_plan.is_finite() {
        return Err(Error::Domain("threshold_plan must be finite and >= 0"));
    }
    if cfg.max_iter == 0 {
        return Err(Error::Domain("max_iter must be >= 1"));
    }
    let (m, n) = (p.len(), q.len());
    let row_plan = |k: usize, l: usize| -> Result<SparsePlan> {
        let triples = emd_1d(&c1.row(k), p, &c2.row(l), q)?;
        Ok(SparsePlan::from_triples(m, n, &triples))
    };

    let k0 = choice(p, rng)?;
    let l0 = choice(q, rng)?;
    let mut plan = row_plan(k0, l0)?;
    let mut best: Option<(f64, SparsePlan)> = None;
    let mut estimates = Vec::new();

    for it in 0..cfg.max_iter {
        let k = choice(p, rng)?;
        let l = sample_columns(&plan, k, q, 1, rng)?[0];
        let next = row_plan(k, l)?;
        if cfg.alpha == 1.0 {
            plan = next;
        } else {
            plan.blend(&next, cfg.alpha);
            plan.prune(cfg.threshold_plan);
        }

        if it % CHECK_EVERY == 0 || it + 1 == cfg.max_iter {
            let (est, _) = sparse_estimation(c1, c2, p, q, loss, &plan, false, rng)?;
            estimates.push(est);
            progress!(
                cfg.verbose,
                it,
                gw_dist_estimated = est,
                nnz = plan.nnz(),
                "pointwise_gromov_wasserstein"
            );
            let improved = match &best {
                Some((b, _)) => est < *b,
                None => true,
            };
            if improved {
                best = Some((est, plan.clone()));
            }
        }
    }

    let best_plan = best.map_or(plan, |(_, t)| t);
    let (value, std) = sparse_estimation(c1, c2, p, q, loss, &best_plan, true, rng)?;
    let log = cfg.log.then(|| StochasticLog {
        gw_dist_estimated: value,
        gw_dist_std: std,
        estimates,
        iterations: cfg.max_iter,
        converged: true,
    });
    Ok(Solution {
        plan: best_plan.to_dense(),
        value,
        log,
    })
}

/// Sampled GW, seeded from `cfg.seed`.
///
/// `value` is the estimated GW loss of the returned plan.
pub fn sampled_gromov_wasserstein<L: PairwiseLoss + ?Sized>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    cfg: &SampledGromovConfig,
) -> Result<Solution<StochasticLog>> {
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    sampled_gromov_wasserstein_with_rng(c1, c2, p, q, loss, cfg, &mut rng)
}

/// Sampled GW with a caller-supplied RNG (`cfg.seed` is ignored).
pub fn sampled_gromov_wasserstein_with_rng<L, R>(
    c1: &ArrayView2<f64>,
    c2: &ArrayView2<f64>,
    p: &ArrayView1<f64>,
    q: &ArrayView1<f64>,
    loss: &L,
    cfg: &SampledGromovConfig,
    rng: &mut R,
) -> Result<Solution<StochasticLog>>
where
    L: PairwiseLoss + ?Sized,
    R: Rng + ?Sized,
{
    validate_structures(c1, c2, p, q)?;
    if !(cfg.epsilon >= 0.0) || !cfg.epsilon.is_finite() {
        return Err(Error::Domain("epsilon must be finite and >= 0"));
    }
    if cfg.max_iter == 0 {
        return Err(Error::Domain("max_iter must be >= 1"));
    }
    let (m, n) = (p.len(), q.len());
    let (nb_p, nb_q) = match cfg.grad_samples {
        Some((rows, cols)) => (rows.clamp(1, m), cols.max(1)),
        None if cfg.nb_samples_grad > m => (m, (cfg.nb_samples_grad / m).max(1)),
        None => (cfg.nb_samples_grad.max(1), 1),
    };
    let inner = SinkhornConfig {
        log: false,
        verbose: false,
        ..cfg.inner.clone()
    };

    let symmetric = is_symmetric(c1, SYMMETRY_TOL) && is_symmetric(c2, SYMMETRY_TOL);
    let pw = p.to_vec();
    let mut t = outer(p, q);
    let mut stagnant = 0usize;
    let mut converged = false;
    let mut iterations = 0usize;

    for it in 0..cfg.max_iter {
        iterations = it + 1;
        let index0 = choice_without_replacement(&pw, nb_p, rng)?;
        let mut lik = Array2::<f64>::zeros((m, n));
        for &i in &index0 {
            let row = t.row(i).to_vec();
            let index1 = choice_without_replacement(&row, nb_q, rng)?;
            if index1.is_empty() {
                continue;
            }
            let scale = 1.0 / index1.len() as f64;
            // Non-symmetric structures have two gradient terms; one is drawn at random.
            let by_column = !symmetric && rng.random::<f64>() > 0.5;
            for a in 0..m {
                for b in 0..n {
                    let mut acc = 0.0f64;
                    for &l in &index1 {
                        acc += if by_column {
                            checked_loss(loss, c1[[a, i]], c2[[b, l]])?
                        } else {
                            checked_loss(loss, c1[[i, a]], c2[[l, b]])?
                        };
                    }
                    lik[[a, b]] += acc * scale;
                }
            }
        }

        let max_lik = lik.iter().copied().fold(0.0f64, f64::max);
        if max_lik == 0.0 {
            continue;
        }
        lik.mapv_inplace(|x| x / max_lik);

        let new_t = if cfg.epsilon > 0.0 {
            // Proximal term: entries of T under e^-200 count as e^-200.
            for (x, &g) in lik.iter_mut().zip(t.iter()) {
                let log_g = if g > 0.0 {
                    g.ln().clamp(LOG_PLAN_FLOOR, 0.0)
                } else {
                    LOG_PLAN_FLOOR
                };
                *x -= cfg.epsilon * log_g;
            }
            match sinkhorn(p, q, &lik.view(), cfg.epsilon, &inner) {
                Ok(sol) => sol.plan,
                Err(Error::NumericalInstability(what)) => {
                    tracing::warn!(
                        it,
                        what,
                        "sampled_gromov_wasserstein: sinkhorn failed, returning last stable plan"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        } else {
            emd(p, q, &lik.view(), false)?.plan
        };

        let change = (&t - &new_t).mapv(|x| x * x).mean().unwrap_or(0.0);
        t = new_t;
        if it % CHECK_EVERY == 0 {
            progress!(cfg.verbose, it, change, "sampled_gromov_wasserstein");
        }
        if change <= STAGNATION_CHANGE {
            stagnant += 1;
            if stagnant > STAGNATION_PATIENCE {
                converged = true;
                break;
            }
        } else {
            stagnant = 0;
        }
    }
    if !converged {
        tracing::debug!(iterations, "sampled_gromov_wasserstein: stopped without stagnating");
    }

    let (value, std) = dense_estimation(c1, c2, p, q, loss, &t.view(), None, None, true, rng)?;
    let log = cfg.log.then(|| StochasticLog {
        gw_dist_estimated: value,
        gw_dist_std: std,
        estimates: Vec::new(),
        iterations,
        converged,
    });
    Ok(Solution {
        plan: t,
        value,
        log,
    })
}
