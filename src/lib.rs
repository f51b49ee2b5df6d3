//! Line-search optimization on dense `ndarray` points.
//!
//! This crate provides first-order, quasi-Newton and Newton solvers for smooth and
//! composite (smooth + prox-friendly) objectives, plus an augmented Lagrangian outer loop for
//! constrained problems. The algorithms follow "Numerical Optimization" by Nocedal & Wright.
//!
//! # Features
//! - Line searches: backtracking Armijo (monotone or GLL non-monotone), Zhang-Hager
//!   non-monotone averaging, and the Moré-Thuente strong Wolfe search.
//! - Solvers: gradient descent with optional momentum/adaptive accelerators and step
//!   schedules, Barzilai-Borwein, BFGS, L-BFGS, Newton-CG, Newton-LDLT, augmented Lagrangian.
//! - Proximal operators for ℓ₁, group ℓ₂, ℓ∞, the ℓ₁ ball and boxes.
//! - Points are `n × k` matrices. Objectives implement only the capability traits they can
//!   provide ([`Problem`], [`GradProblem`], [`HessProblem`], [`ProxProblem`],
//!   [`ConstrainedProblem`]).
//!
//! ## Defaults (key settings)
//! - Armijo and Zhang-Hager: halve the step, at most 30 trials.
//! - Moré-Thuente: `c1=1e-4`, `c2=0.9`, at most 20 trials.
//! - BFGS and L-BFGS (`memory = 4`) use Moré-Thuente; the first step is a gradient step of `1e-2`.
//! - Every solver stops when the step, the relative loss change and the gradient norm are all
//!   below their tolerances, or as soon as the gradient norm drops below `√ε`.
//!
//! # Example
//!
//! Minimize the Rosenbrock function, a classic test case for optimization algorithms.
//!
//! ```
//! use ndarray::{Array2, array};
//! use wolfe_optim::{Bfgs, GradProblem, Problem, Solution};
//!
//! struct Rosenbrock;
//!
//! impl Problem for Rosenbrock {
//!     fn loss(&mut self, x: &Array2<f64>) -> f64 {
//!         let (a, b) = (x[[0, 0]], x[[0, 1]]);
//!         (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2)
//!     }
//! }
//!
//! impl GradProblem for Rosenbrock {
//!     fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
//!         let (a, b) = (x[[0, 0]], x[[0, 1]]);
//!         out[[0, 0]] = -2.0 * (1.0 - a) - 400.0 * a * (b - a * a);
//!         out[[0, 1]] = 200.0 * (b - a * a);
//!     }
//! }
//!
//! let Solution {
//!     final_point: x_min,
//!     final_value,
//!     iterations,
//!     ..
//! } = Bfgs::new()
//!     .with_max_iterations(200)
//!     .run(&mut Rosenbrock, array![[-1.2, 1.0]])
//!     .expect("BFGS failed to solve");
//!
//! println!(
//!     "Found minimum f({}) = {:.4} in {} iterations.",
//!     x_min, final_value, iterations
//! );
//!
//! // The known minimum is at [1.0, 1.0].
//! assert!((x_min[[0, 0]] - 1.0).abs() < 1e-4);
//! assert!((x_min[[0, 1]] - 1.0).abs() < 1e-4);
//! ```

pub mod accelerator;
pub mod diagnostics;
pub mod error;
pub mod line_search;
pub mod linalg;
pub mod problem;
pub mod prox;
pub mod quasi_newton;
pub mod recorder;
pub mod scheduler;
pub mod solver;
pub mod state;

pub use accelerator::{Accelerator, AdaDelta, AdaGrad, Adam, Nesterov, PlainGradient, RmsProp};
pub use diagnostics::{Diagnostics, IterationRecord, LogSink, NoopSink};
pub use error::OptimError;
pub use line_search::{
    Armijo, ArmijoParams, FixedStep, LineSearch, MoreThuente, MoreThuenteParams, StepBounds,
    ZhangHager, ZhangHagerParams,
};
pub use problem::{ConstrainedProblem, GradProblem, HessProblem, Problem, ProxProblem};
pub use scheduler::{BarzilaiBorweinStep, ConstantStep, ExponentialDecay, StepScheduler};
pub use solver::alm::{AlmMultipliers, AlmOptions, AugmentedLagrangian};
pub use solver::barzilai_borwein::{BarzilaiBorwein, BarzilaiBorweinOptions};
pub use solver::bfgs::{Bfgs, BfgsOptions};
pub use solver::gradient_descent::{GradientDescent, GradientDescentOptions};
pub use solver::lbfgs::{Lbfgs, LbfgsOptions};
pub use solver::newton::{NewtonCg, NewtonLdlt, NewtonOptions};
pub use solver::{ConvergenceParams, Solution, SolveReport, Solver, Status};
pub use state::LineSearchState;
