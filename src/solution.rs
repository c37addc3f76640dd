use crate::{Error, Result};
use ndarray::Array2;

/// Common view over the per-solver diagnostics records.
pub trait Diagnostics {
    /// Whether the solver met its tolerance before the iteration cap.
    fn converged(&self) -> bool;
    /// Outer iterations actually performed (pivots for the exact solver).
    fn iterations(&self) -> usize;
}

/// Output of every solver: a coupling, the objective it achieves, and optional diagnostics.
///
/// `log` is `Some` only when the solver config asked for it (`log: true`).
#[derive(Debug, Clone)]
pub struct Solution<L> {
    /// Transport plan (rows: source support, columns: target support).
    pub plan: Array2<f64>,
    /// Objective achieved by `plan` (transport cost, GW / FGW loss, or estimated distance).
    pub value: f64,
    /// Solver diagnostics.
    pub log: Option<L>,
}

impl<L: Diagnostics> Solution<L> {
    /// `Some(converged)` when diagnostics were recorded.
    pub fn converged(&self) -> Option<bool> {
        self.log.as_ref().map(Diagnostics::converged)
    }

    /// Turn a recorded non-convergence into [`Error::NonConvergence`].
    ///
    /// Without diagnostics there is nothing to check and the solution passes through.
    pub fn into_converged(self) -> Result<Self> {
        match &self.log {
            Some(log) if !log.converged() => Err(Error::NonConvergence(log.iterations())),
            _ => Ok(self),
        }
    }
}
