//! # gwot
//!
//! Optimal transport between discrete distributions, and its structural cousins
//! (Gromov-Wasserstein, fused Gromov-Wasserstein) with barycenters.
//!
//! This crate is a set of **numerical solvers**, nothing more:
//!
//! - it takes marginals and cost / structure matrices (`ndarray`, `f64`),
//! - it returns a coupling, the achieved objective, and (optionally) diagnostics,
//! - it does not generate datasets, plot, or read files.
//!
//! ## Public invariants (must not change)
//!
//! - **Inputs are borrowed, never mutated**: every call is a pure function of its arguments
//!   (plus an explicit seed for the stochastic solvers). Working copies live inside the call.
//! - **Shape / feasibility errors are raised before iterating** ([`Error::DimensionMismatch`],
//!   [`Error::InfeasibleMarginals`], [`Error::Degenerate`]).
//! - **Hitting an iteration cap is not an error**: the best iterate is returned and the
//!   diagnostics say `converged == false` (see [`Solution::into_converged`] for strictness).
//! - **Determinism knobs are explicit**: stochastic solvers take `seed` in their config, or an
//!   explicit `rand::Rng` through the `*_with_rng` variants.
//!
//! ## Module map
//!
//! - `cost`: pairwise cost / structure matrices from point sets, validation
//! - `simplex`: marginals (uniform, validation, normalization, plan marginal error)
//! - `emd`: exact transport (network simplex) and 1-D exact transport
//! - `sinkhorn`: entropic transport (standard and stabilized scaling)
//! - `loss`: decomposable loss kernels and the O(n³) GW tensor contraction
//! - `cg`: conditional-gradient (Frank-Wolfe) loop with exact quadratic line search
//! - `gromov`: exact and entropic Gromov-Wasserstein
//! - `fused`: fused Gromov-Wasserstein (features + structure)
//! - `pairwise`: pointwise losses for the stochastic solvers
//! - `stochastic`: pointwise and sampled Gromov-Wasserstein
//! - `barycenter`: GW / FGW barycenters
//!
//! ## Logging
//!
//! Iteration progress is emitted through `tracing` (`debug!`, or `info!` when a config sets
//! `verbose`). Iteration-cap exhaustion is a `warn!`. No subscriber is installed here.
//!
//! ## References
//!
//! - Mémoli (2011), *Gromov-Wasserstein distances and the metric approach to object matching*.
//! - Peyré, Cuturi, Solomon (2016), *Gromov-Wasserstein averaging of kernel and distance matrices*.
//! - Vayer et al. (2019), *Optimal transport for structured data with application on graphs*.
//! - Kerdoncuff, Emonet, Sebban (2021), *Sampled Gromov Wasserstein*.
//! - Bonneel et al. (2011), *Displacement interpolation using Lagrangian mass transport*
//!   (network simplex for transport).

/// Per-iteration progress event: `info!` when the caller asked for `verbose`, `debug!` otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod barycenter;
pub mod cg;
pub mod cost;
pub mod emd;
pub mod fused;
pub mod gromov;
pub mod loss;
pub mod pairwise;
pub mod simplex;
pub mod sinkhorn;
mod solution;
pub mod stochastic;

pub use barycenter::{
    entropic_gromov_barycenters, fgw_barycenters, gromov_barycenters, BarycenterConfig,
    BarycenterLog, BarycenterSolver, FgwBarycenter, GwBarycenter,
};
pub use cg::{CgLog, GromovConfig};
pub use cost::{dist, dist_self, Metric};
pub use emd::{emd, emd2, emd_1d, EmdLog, EmdStatus};
pub use fused::{fgw_terms, fused_gromov_wasserstein, fused_gromov_wasserstein2};
pub use gromov::{
    entropic_gromov_wasserstein, entropic_gromov_wasserstein2, gromov_wasserstein,
    gromov_wasserstein2, EntropicGromovConfig, EntropicGromovLog,
};
pub use loss::{KlLoss, Loss, LossKernel, SquareLoss};
pub use pairwise::{AbsoluteLoss, PairwiseLoss};
pub use simplex::uniform;
pub use sinkhorn::{sinkhorn, sinkhorn2, SinkhornConfig, SinkhornLog, SinkhornMethod};
pub use solution::{Diagnostics, Solution};
pub use stochastic::{
    gw_distance_estimation, pointwise_gromov_wasserstein, pointwise_gromov_wasserstein_with_rng,
    sampled_gromov_wasserstein, sampled_gromov_wasserstein_with_rng, PointwiseGromovConfig,
    SampledGromovConfig, SparsePlan, StochasticLog,
};

/// gwot error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Marginal lengths and matrix shapes are incompatible.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(&'static str),
    /// Exact transport needs both marginals to carry the same total mass.
    #[error("infeasible marginals: source mass {source_mass} vs target mass {target_mass}")]
    InfeasibleMarginals { source_mass: f64, target_mass: f64 },
    /// Overflow / underflow in an exponential kernel, or a NaN was produced.
    #[error("numerical instability: {0}")]
    NumericalInstability(&'static str),
    /// Iteration cap reached without meeting the tolerance.
    ///
    /// Solvers never return this themselves; see [`Solution::into_converged`].
    #[error("did not converge within {0} iterations")]
    NonConvergence(usize),
    /// Negative or non-finite entries where a cost / marginal is expected.
    #[error("degenerate input: {0}")]
    Degenerate(&'static str),
    /// Invalid scalar parameter.
    #[error("domain error: {0}")]
    Domain(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
