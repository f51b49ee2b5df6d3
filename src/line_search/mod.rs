//! Step-length selection along a search direction.
//!
//! Every strategy follows the same contract. On entry the state holds `step`, `prev_x`,
//! `prev_loss`, `prev_grad`, `direction` (and `prev_grad_map` for composite problems). On
//! return `cur_x`, `cur_loss` and `cur_grad` (and `cur_grad_map`) describe the accepted point.
//! A strategy that exhausts its trial budget still returns a point (the best or the
//! minimum-step one) and reports `success() == false`; the solver decides what that means.

mod armijo;
mod more_thuente;
mod zhang_hager;

pub use armijo::{Armijo, ArmijoParams};
pub use more_thuente::{MoreThuente, MoreThuenteParams};
pub use zhang_hager::{ZhangHager, ZhangHagerParams};

use crate::error::OptimError;
use crate::problem::LineSearchProblem;
use crate::solver::invalid;
use crate::state::LineSearchState;

/// Admissible step range shared by all strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepBounds {
    pub min_step: f64,
    pub max_step: f64,
}

impl Default for StepBounds {
    fn default() -> Self {
        Self {
            min_step: f64::EPSILON.sqrt(),
            max_step: 1e2,
        }
    }
}

impl StepBounds {
    pub fn clamp(&self, step: f64) -> f64 {
        step.clamp(self.min_step, self.max_step)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.min_step > 0.0 && self.min_step <= self.max_step && self.max_step.is_finite()
    }
}

pub trait LineSearch {
    /// Seeds per-solve state. Called once, after the first `flush`.
    fn init(&mut self, _state: &LineSearchState) {}

    fn search<P: LineSearchProblem>(&mut self, problem: &mut P, state: &mut LineSearchState);

    /// Whether the last search met its acceptance test.
    fn success(&self) -> bool {
        true
    }

    /// Trial points evaluated by the last search.
    fn n_iter(&self) -> usize;

    fn bounds(&self) -> StepBounds;

    /// Rejects parameter sets the search cannot work with.
    fn validate(&self) -> Result<(), OptimError> {
        if self.bounds().is_valid() {
            Ok(())
        } else {
            Err(invalid("bounds", "need 0 < min_step <= max_step < inf"))
        }
    }
}

/// Takes the incoming step without any test.
#[derive(Debug, Clone, Default)]
pub struct FixedStep {
    pub bounds: StepBounds,
}

impl LineSearch for FixedStep {
    fn search<P: LineSearchProblem>(&mut self, problem: &mut P, state: &mut LineSearchState) {
        state.step_forward(problem);
        state.evaluate_loss(problem);
        state.evaluate_gradient(problem);
    }

    fn n_iter(&self) -> usize {
        1
    }

    fn bounds(&self) -> StepBounds {
        self.bounds
    }
}

/// Shared fallback once the trial budget is spent: take the minimum admissible step.
pub(crate) fn take_min_step<P: LineSearchProblem>(
    problem: &mut P,
    state: &mut LineSearchState,
    bounds: &StepBounds,
) {
    state.step = bounds.min_step;
    state.step_forward(problem);
    state.evaluate_loss(problem);
    state.evaluate_gradient(problem);
}

#[cfg(test)]
pub(crate) mod test_problems {
    use ndarray::Array2;

    use crate::problem::{GradProblem, Problem};

    /// `Σ wᵢ·xᵢ²`.
    pub struct WeightedQuadratic(pub Vec<f64>);

    impl Problem for WeightedQuadratic {
        fn loss(&mut self, x: &Array2<f64>) -> f64 {
            x.iter().zip(self.0.iter()).map(|(v, w)| w * v * v).sum()
        }
    }

    impl GradProblem for WeightedQuadratic {
        fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
            for ((o, v), w) in out.iter_mut().zip(x.iter()).zip(self.0.iter()) {
                *o = 2.0 * w * v;
            }
        }
    }

    /// A one-dimensional function `φ(α)` exposed as a 1×1 problem.
    pub struct Scalar<F>(pub F);

    impl<F: Fn(f64) -> (f64, f64)> Problem for Scalar<F> {
        fn loss(&mut self, x: &Array2<f64>) -> f64 {
            (self.0)(x[[0, 0]]).0
        }
    }

    impl<F: Fn(f64) -> (f64, f64)> GradProblem for Scalar<F> {
        fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
            out[[0, 0]] = (self.0)(x[[0, 0]]).1;
        }
    }
}
