//! Capability traits for user objectives.
//!
//! A problem only implements what it can provide: a loss, a gradient, a dense Hessian, a
//! proximal split, or constraints for the augmented Lagrangian. Solvers bound on the
//! capability they need. Points are `n × k` matrices; all methods take `&mut self` so a
//! problem may count evaluations or cache intermediate products.

use ndarray::Array2;

use crate::solver::alm::AlmMultipliers;

/// An objective `f(x)`.
pub trait Problem {
    fn loss(&mut self, x: &Array2<f64>) -> f64;
}

/// An objective with a gradient.
pub trait GradProblem: Problem {
    /// Writes `∇f(x)` into `out`. `out` already has the shape of `x`.
    fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>);
}

/// An objective with a dense Hessian.
pub trait HessProblem: GradProblem {
    /// Writes the `nk × nk` Hessian into `out`, indexing points in row-major order.
    fn hess(&mut self, x: &Array2<f64>, out: &mut Array2<f64>);
}

/// A composite objective `f(x) = s(x) + r(x)` with smooth `s` and prox-friendly `r`.
///
/// `grad` must return the gradient of the smooth part only. `loss` should return the sum.
pub trait ProxProblem: GradProblem {
    fn smooth_loss(&mut self, x: &Array2<f64>) -> f64;
    fn nonsmooth_loss(&mut self, x: &Array2<f64>) -> f64;
    /// Writes `argmin_y r(y) + ‖y − x‖² / (2·step)` into `out`.
    fn prox(&mut self, step: f64, x: &Array2<f64>, out: &mut Array2<f64>);
}

/// A problem driven by the augmented Lagrangian method.
///
/// `loss`/`grad` describe the augmented Lagrangian at the current multipliers. Constraints
/// follow `h(x) = 0` and `g(x) ≤ 0`; a problem without one kind leaves the default, which
/// produces an empty residual.
pub trait ConstrainedProblem: GradProblem {
    fn multipliers(&self) -> &AlmMultipliers;
    fn multipliers_mut(&mut self) -> &mut AlmMultipliers;

    /// Writes `h(x)` into `out`, shaped like the equality multipliers.
    fn equality_constraint(&mut self, _x: &Array2<f64>, _out: &mut Array2<f64>) {}

    /// Writes `g(x)` into `out`, shaped like the inequality multipliers.
    fn inequality_constraint(&mut self, _x: &Array2<f64>, _out: &mut Array2<f64>) {}

    /// Minimizes the augmented Lagrangian in place, to within `multipliers().gtol`.
    fn solve_subproblem(&mut self, x: &mut Array2<f64>);
}

/// The view a line search has of a problem.
///
/// Implemented by the [`Smooth`] and [`Composite`] adapters, so the same search code serves
/// plain and proximal problems.
pub trait LineSearchProblem {
    /// Whether trial points are passed through a proximal operator.
    const COMPOSITE: bool;

    /// Returns `(smooth, nonsmooth)` parts of the loss. Smooth problems report `0.0` for the
    /// second part.
    fn loss_parts(&mut self, x: &Array2<f64>) -> (f64, f64);

    fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>);

    /// Identity for smooth problems.
    fn prox(&mut self, step: f64, x: &Array2<f64>, out: &mut Array2<f64>);
}

/// Adapter for problems without a non-smooth part.
pub struct Smooth<'a, P: ?Sized>(pub &'a mut P);

impl<P: GradProblem + ?Sized> LineSearchProblem for Smooth<'_, P> {
    const COMPOSITE: bool = false;

    fn loss_parts(&mut self, x: &Array2<f64>) -> (f64, f64) {
        (self.0.loss(x), 0.0)
    }

    fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
        self.0.grad(x, out);
    }

    fn prox(&mut self, _step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
        out.assign(x);
    }
}

/// Adapter routing trial points through the problem's proximal operator.
pub struct Composite<'a, P: ?Sized>(pub &'a mut P);

impl<P: ProxProblem + ?Sized> LineSearchProblem for Composite<'_, P> {
    const COMPOSITE: bool = true;

    fn loss_parts(&mut self, x: &Array2<f64>) -> (f64, f64) {
        (self.0.smooth_loss(x), self.0.nonsmooth_loss(x))
    }

    fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
        self.0.grad(x, out);
    }

    fn prox(&mut self, step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
        self.0.prox(step, x, out);
    }
}
