//! Exact optimal transport (earth mover's distance).
//!
//! Solves the transportation linear program
//! \[
//! \min_{G \ge 0} \langle G, C\rangle \quad \text{s.t.}\quad G\mathbf 1 = a,\ G^\top \mathbf 1 = b
//! \]
//! with a primal **network simplex** on the complete bipartite graph (sources `0..m`, sinks
//! `m..m+n`) augmented by an artificial root node:
//!
//! - the initial spanning tree hangs every node off the root through an artificial arc whose
//!   cost is larger than any real path, so the artificial flow is driven to zero;
//! - pricing is a cyclic **block search** over the real arcs (block ≈ `sqrt(m·n)`);
//! - the leaving arc follows the strongly-feasible rule (strict on the source side of the
//!   cycle, non-strict on the sink side), which rules out cycling on degenerate problems.
//!
//! There is no iteration knob: the pivot cap is internal and only reported through
//! [`EmdStatus::MaxIterReached`].

use crate::cost::validate_cost;
use crate::simplex::check_marginals;
use crate::solution::{Diagnostics, Solution};
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Relative tolerance when comparing total masses of the two marginals.
const MASS_RTOL: f64 = 1e-7;
/// Relative pricing tolerance (scaled by the magnitude of the potentials involved).
const PRICE_EPS: f64 = 2.220446049250313e-15;
const MIN_BLOCK_SIZE: usize = 10;
const MIN_PIVOT_CAP: usize = 100_000;

const STATE_TREE: i8 = 0;
const STATE_LOWER: i8 = 1;

const DIR_UP: i8 = 1;
const DIR_DOWN: i8 = -1;

const NONE: usize = usize::MAX;

/// Termination status of the network simplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmdStatus {
    Optimal,
    MaxIterReached,
}

/// Diagnostics of an exact solve.
#[derive(Debug, Clone)]
pub struct EmdLog {
    pub status: EmdStatus,
    /// Number of simplex pivots.
    pub pivots: usize,
    /// Source dual potentials (centered).
    pub u: Array1<f64>,
    /// Target dual potentials (centered).
    pub v: Array1<f64>,
    /// Optimal cost.
    pub cost: f64,
}

impl Diagnostics for EmdLog {
    fn converged(&self) -> bool {
        self.status == EmdStatus::Optimal
    }

    fn iterations(&self) -> usize {
        self.pivots
    }
}

struct NetworkSimplex<'a> {
    m: usize,
    n: usize,
    root: usize,
    cost: ArrayView2<'a, f64>,
    art_cost: f64,
    /// Artificial arc of node `u` points from `u` to the root (`true`) or from the root to `u`.
    art_up: Vec<bool>,
    flow: Vec<f64>,
    state: Vec<i8>,
    parent: Vec<usize>,
    pred: Vec<usize>,
    pred_dir: Vec<i8>,
    depth: Vec<usize>,
    pi: Vec<f64>,
    tree_adj: Vec<Vec<usize>>,
    block_size: usize,
    next_arc: usize,
}

impl<'a> NetworkSimplex<'a> {
    fn new(a: &ArrayView1<f64>, b: &ArrayView1<f64>, cost: ArrayView2<'a, f64>) -> Self {
        let (m, n) = (a.len(), b.len());
        let node_num = m + n;
        let root = node_num;
        let arc_num = m * n;

        let max_cost = cost.iter().copied().fold(0.0f64, f64::max);
        let art_cost = (max_cost + 1.0) * (node_num + 1) as f64;

        let mut flow = vec![0.0f64; arc_num + node_num];
        let mut state = vec![STATE_LOWER; arc_num + node_num];
        let mut art_up = vec![true; node_num];
        let mut parent = vec![root; node_num + 1];
        let mut pred = vec![NONE; node_num + 1];
        let mut pred_dir = vec![DIR_UP; node_num + 1];
        let mut depth = vec![1usize; node_num + 1];
        let mut pi = vec![0.0f64; node_num + 1];
        let mut tree_adj = vec![Vec::new(); node_num + 1];

        for u in 0..node_num {
            let supply = if u < m { a[u] } else { -b[u - m] };
            let e = arc_num + u;
            state[e] = STATE_TREE;
            pred[u] = e;
            if supply >= 0.0 {
                art_up[u] = true;
                pred_dir[u] = DIR_UP;
                flow[e] = supply;
                pi[u] = -art_cost;
            } else {
                art_up[u] = false;
                pred_dir[u] = DIR_DOWN;
                flow[e] = -supply;
                pi[u] = art_cost;
            }
            tree_adj[u].push(e);
            tree_adj[root].push(e);
        }
        parent[root] = NONE;
        depth[root] = 0;

        let block_size = ((arc_num as f64).sqrt().ceil() as usize).max(MIN_BLOCK_SIZE);

        Self {
            m,
            n,
            root,
            cost,
            art_cost,
            art_up,
            flow,
            state,
            parent,
            pred,
            pred_dir,
            depth,
            pi,
            tree_adj,
            block_size,
            next_arc: 0,
        }
    }

    #[inline]
    fn arc_num(&self) -> usize {
        self.m * self.n
    }

    #[inline]
    fn endpoints(&self, e: usize) -> (usize, usize) {
        if e < self.arc_num() {
            (e / self.n, self.m + e % self.n)
        } else {
            let u = e - self.arc_num();
            if self.art_up[u] {
                (u, self.root)
            } else {
                (self.root, u)
            }
        }
    }

    #[inline]
    fn arc_cost(&self, e: usize) -> f64 {
        if e < self.arc_num() {
            self.cost[[e / self.n, e % self.n]]
        } else {
            self.art_cost
        }
    }

    #[inline]
    fn reduced_cost(&self, e: usize) -> f64 {
        let (s, t) = self.endpoints(e);
        self.arc_cost(e) + self.pi[s] - self.pi[t]
    }

    /// Block-search pricing over the real arcs. Returns the entering arc, if any.
    fn find_entering(&mut self) -> Option<usize> {
        let arc_num = self.arc_num();
        let mut best: Option<usize> = None;
        let mut min = 0.0f64;
        let mut cnt = self.block_size;
        let mut e = self.next_arc;
        for _ in 0..arc_num {
            if self.state[e] == STATE_LOWER {
                let (s, t) = self.endpoints(e);
                let c = self.reduced_cost(e);
                let tol = PRICE_EPS * (self.pi[s].abs() + self.pi[t].abs());
                if c < min && c < -tol {
                    min = c;
                    best = Some(e);
                }
            }
            e += 1;
            if e == arc_num {
                e = 0;
            }
            cnt -= 1;
            if cnt == 0 {
                if best.is_some() {
                    self.next_arc = e;
                    return best;
                }
                cnt = self.block_size;
            }
        }
        if best.is_some() {
            self.next_arc = e;
        }
        best
    }

    fn find_join(&self, mut u: usize, mut v: usize) -> usize {
        while self.depth[u] > self.depth[v] {
            u = self.parent[u];
        }
        while self.depth[v] > self.depth[u] {
            v = self.parent[v];
        }
        while u != v {
            u = self.parent[u];
            v = self.parent[v];
        }
        u
    }

    /// One pivot with entering arc `e_in`. Returns `false` if the cycle is unbounded.
    fn pivot(&mut self, e_in: usize) -> bool {
        let (first, second) = self.endpoints(e_in);
        let join = self.find_join(first, second);

        // Leaving arc: strict comparison on the first path, non-strict on the second.
        let mut delta = f64::INFINITY;
        let mut u_out = NONE;
        let mut u = first;
        while u != join {
            if self.pred_dir[u] == DIR_UP {
                let d = self.flow[self.pred[u]];
                if d < delta {
                    delta = d;
                    u_out = u;
                }
            }
            u = self.parent[u];
        }
        let mut u = second;
        while u != join {
            if self.pred_dir[u] == DIR_DOWN {
                let d = self.flow[self.pred[u]];
                if d <= delta {
                    delta = d;
                    u_out = u;
                }
            }
            u = self.parent[u];
        }
        if u_out == NONE {
            return false;
        }

        // Push `delta` around the cycle.
        if delta > 0.0 {
            self.flow[e_in] += delta;
            let mut u = first;
            while u != join {
                let e = self.pred[u];
                self.flow[e] -= f64::from(self.pred_dir[u]) * delta;
                u = self.parent[u];
            }
            let mut u = second;
            while u != join {
                let e = self.pred[u];
                self.flow[e] += f64::from(self.pred_dir[u]) * delta;
                u = self.parent[u];
            }
        }

        let e_out = self.pred[u_out];
        self.flow[e_out] = 0.0;
        self.state[e_out] = STATE_LOWER;
        self.state[e_in] = STATE_TREE;

        let (so, to) = self.endpoints(e_out);
        self.tree_adj[so].retain(|&e| e != e_out);
        self.tree_adj[to].retain(|&e| e != e_out);
        let (si, ti) = self.endpoints(e_in);
        self.tree_adj[si].push(e_in);
        self.tree_adj[ti].push(e_in);

        self.rebuild_tree();
        true
    }

    /// Recompute parent pointers, depths, and potentials from the tree arcs.
    fn rebuild_tree(&mut self) {
        let root = self.root;
        self.parent[root] = NONE;
        self.pred[root] = NONE;
        self.depth[root] = 0;
        self.pi[root] = 0.0;
        let mut stack = vec![root];
        while let Some(u) = stack.pop() {
            for k in 0..self.tree_adj[u].len() {
                let e = self.tree_adj[u][k];
                if e == self.pred[u] {
                    continue;
                }
                let (s, t) = self.endpoints(e);
                let w = if s == u { t } else { s };
                let c = self.arc_cost(e);
                self.parent[w] = u;
                self.pred[w] = e;
                self.depth[w] = self.depth[u] + 1;
                if s == w {
                    self.pred_dir[w] = DIR_UP;
                    self.pi[w] = self.pi[u] - c;
                } else {
                    self.pred_dir[w] = DIR_DOWN;
                    self.pi[w] = self.pi[u] + c;
                }
                stack.push(w);
            }
        }
    }

    fn run(&mut self, cap: usize) -> (EmdStatus, usize) {
        let mut pivots = 0usize;
        while let Some(e_in) = self.find_entering() {
            if pivots >= cap {
                return (EmdStatus::MaxIterReached, pivots);
            }
            if !self.pivot(e_in) {
                // Unbounded cycle; impossible with nonnegative costs.
                return (EmdStatus::MaxIterReached, pivots);
            }
            pivots += 1;
        }
        (EmdStatus::Optimal, pivots)
    }
}

/// Shift dual potentials so that `a·u` and `b·v` carry the constant symmetrically.
///
/// `u_i + v_j` is unchanged, so dual feasibility and the dual objective are preserved.
pub fn center_ot_dual(
    u: &ArrayView1<f64>,
    v: &ArrayView1<f64>,
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let c = (b.dot(v) - a.dot(u)) / (a.sum() + b.sum());
    (u.mapv(|x| x + c), v.mapv(|x| x - c))
}

/// Exact optimal transport plan between `a` (length m) and `b` (length n) for cost `m×n`.
///
/// - Total masses must agree within a relative `1e-7`; `b` is then rescaled to `a`'s mass.
/// - Costs must be finite and nonnegative.
///
/// `value` is the optimal cost `⟨G, C⟩`. With `log = true`, the dual potentials and pivot
/// count are returned in [`EmdLog`].
pub fn emd(
    a: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
    cost: &ArrayView2<f64>,
    log: bool,
) -> Result<Solution<EmdLog>> {
    let (m, n) = (a.len(), b.len());
    let (sa, sb) = check_marginals(a, b)?;
    validate_cost(cost, m, n)?;
    if (sa - sb).abs() > MASS_RTOL * sa.max(sb) {
        return Err(Error::InfeasibleMarginals {
            source_mass: sa,
            target_mass: sb,
        });
    }
    let b_scaled = b.mapv(|x| x * sa / sb);

    let mut ns = NetworkSimplex::new(a, &b_scaled.view(), cost.view());
    let cap = MIN_PIVOT_CAP.max(m * n);
    let (status, pivots) = ns.run(cap);
    if status == EmdStatus::MaxIterReached {
        tracing::warn!(pivots, "emd: pivot cap reached before optimality");
    }

    let mut plan = Array2::<f64>::zeros((m, n));
    let mut value = 0.0f64;
    for i in 0..m {
        for j in 0..n {
            let g = ns.flow[i * n + j];
            plan[[i, j]] = g;
            value += g * cost[[i, j]];
        }
    }

    let art_flow: f64 = ns.flow[m * n..].iter().sum();
    if art_flow > 1e-9 * sa {
        tracing::warn!(art_flow, "emd: residual flow on artificial arcs");
    }
    tracing::debug!(m, n, pivots, value, "emd solved");

    let log = log.then(|| {
        let u: Array1<f64> = (0..m).map(|i| -ns.pi[i]).collect();
        let v: Array1<f64> = (0..n).map(|j| ns.pi[m + j]).collect();
        let (u, v) = center_ot_dual(&u.view(), &v.view(), a, &b_scaled.view());
        EmdLog {
            status,
            pivots,
            u,
            v,
            cost: value,
        }
    });

    Ok(Solution { plan, value, log })
}

/// Optimal transport cost only (see [`emd`]).
pub fn emd2(a: &ArrayView1<f64>, b: &ArrayView1<f64>, cost: &ArrayView2<f64>) -> Result<f64> {
    Ok(emd(a, b, cost, false)?.value)
}

/// Exact 1-D transport between scalar supports `x` (weights `a`) and `y` (weights `b`).
///
/// Valid for any ground cost that is a convex function of `x - y` (the monotone coupling is
/// optimal). Returns the plan as a sparse list of `(i, j, mass)` with at most `m + n - 1`
/// entries; `b` is rescaled to `a`'s total mass.
pub fn emd_1d(
    x: &ArrayView1<f64>,
    a: &ArrayView1<f64>,
    y: &ArrayView1<f64>,
    b: &ArrayView1<f64>,
) -> Result<Vec<(usize, usize, f64)>> {
    if x.len() != a.len() || y.len() != b.len() {
        return Err(Error::DimensionMismatch("support and weights must have the same length"));
    }
    let (sa, sb) = check_marginals(a, b)?;
    if x.iter().any(|v| !v.is_finite()) || y.iter().any(|v| !v.is_finite()) {
        return Err(Error::Degenerate("supports contain NaN/Inf"));
    }
    let scale = sa / sb;

    let mut xi: Vec<usize> = (0..x.len()).collect();
    let mut yi: Vec<usize> = (0..y.len()).collect();
    xi.sort_by(|&i, &j| x[i].total_cmp(&x[j]));
    yi.sort_by(|&i, &j| y[i].total_cmp(&y[j]));

    let (m, n) = (xi.len(), yi.len());
    let mut out = Vec::with_capacity(m + n - 1);
    let (mut i, mut j) = (0usize, 0usize);
    let mut ra = a[xi[0]];
    let mut rb = b[yi[0]] * scale;
    while i < m && j < n {
        if ra <= rb {
            if ra > 0.0 {
                out.push((xi[i], yi[j], ra));
            }
            rb -= ra;
            i += 1;
            if i < m {
                ra = a[xi[i]];
            }
        } else {
            if rb > 0.0 {
                out.push((xi[i], yi[j], rb));
            }
            ra -= rb;
            j += 1;
            if j < n {
                rb = b[yi[j]] * scale;
            }
        }
    }
    Ok(out)
}
