//! Pointwise losses for the stochastic GW solvers.
//!
//! Contract: `eval` is pure, takes one entry of each structure, and returns a finite,
//! nonnegative scalar. Closures `Fn(f64, f64) -> f64` qualify directly.

use crate::loss::{KlLoss, Loss, LossKernel, SquareLoss};

/// A pairwise loss between one entry of `C1` and one entry of `C2`.
pub trait PairwiseLoss: Sync {
    fn eval(&self, a: f64, b: f64) -> f64;
}

impl<F> PairwiseLoss for F
where
    F: Fn(f64, f64) -> f64 + Sync,
{
    fn eval(&self, a: f64, b: f64) -> f64 {
        self(a, b)
    }
}

/// `|a - b|`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsoluteLoss;

impl PairwiseLoss for AbsoluteLoss {
    fn eval(&self, a: f64, b: f64) -> f64 {
        (a - b).abs()
    }
}

impl PairwiseLoss for SquareLoss {
    fn eval(&self, a: f64, b: f64) -> f64 {
        self.loss(a, b)
    }
}

impl PairwiseLoss for KlLoss {
    fn eval(&self, a: f64, b: f64) -> f64 {
        self.loss(a, b)
    }
}

impl PairwiseLoss for Loss {
    fn eval(&self, a: f64, b: f64) -> f64 {
        self.loss(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_dyn(l: &dyn PairwiseLoss, a: f64, b: f64) -> f64 {
        l.eval(a, b)
    }

    #[test]
    fn closures_and_kernels_are_pairwise_losses() {
        let cube = |a: f64, b: f64| (a - b).abs().powi(3);
        assert_eq!(eval_dyn(&cube, 3.0, 1.0), 8.0);
        assert_eq!(eval_dyn(&AbsoluteLoss, 1.0, 3.5), 2.5);
        assert!((eval_dyn(&SquareLoss, 1.0, 3.0) - 4.0).abs() < 1e-12);
        assert!((eval_dyn(&Loss::Square, 1.0, 3.0) - 4.0).abs() < 1e-12);
        assert!(eval_dyn(&KlLoss, 0.4, 0.4).abs() < 1e-12);
    }
}
