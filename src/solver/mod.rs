//! Solver drivers and the bookkeeping they share.
//!
//! Every driver owns a [`LineSearchState`] for one `solve` call and walks
//! `Initialized → Iterating → {Converged | MaxIterReached | LineSearchFailed | NumericalError}`.
//! `solve` is infallible: it always moves the final iterate into the caller's buffer and
//! returns the final loss, with the outcome in [`Solver::report`]. `run` wraps the same call
//! and turns a non-converged outcome into an [`OptimError`].

pub mod alm;
pub mod barzilai_borwein;
pub mod bfgs;
pub mod gradient_descent;
pub mod lbfgs;
pub mod newton;

use std::fmt;

use ndarray::Array2;

use crate::diagnostics::{Diagnostics, IterationRecord};
use crate::error::OptimError;
use crate::linalg::MatOps;
use crate::state::LineSearchState;

const SQRT_EPS: f64 = 1.490_116_119_384_765_6e-8;

/// Where a solver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    #[default]
    Initialized,
    Iterating,
    Converged,
    MaxIterReached,
    LineSearchFailed,
    NumericalError,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Initialized => write!(f, "initialized"),
            Status::Iterating => write!(f, "iterating"),
            Status::Converged => write!(f, "converged"),
            Status::MaxIterReached => write!(f, "maximum iterations reached"),
            Status::LineSearchFailed => write!(f, "line search failed"),
            Status::NumericalError => write!(f, "numerical error"),
        }
    }
}

/// Stopping rule shared by the line-search drivers.
///
/// A solve stops when `‖Δx‖ < xtol`, `|Δf| / (|f_prev| + 1) < ftol` and `‖g‖ < gtol` hold
/// together, or as soon as `‖g‖` drops below `√ε`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvergenceParams {
    pub max_iter: usize,
    pub xtol: f64,
    pub ftol: f64,
    pub gtol: f64,
}

impl ConvergenceParams {
    pub fn is_converged(&self, x_diff: f64, f_diff: f64, grad_norm: f64) -> bool {
        (x_diff < self.xtol && f_diff < self.ftol && grad_norm < self.gtol) || grad_norm < SQRT_EPS
    }

    pub fn validate(&self) -> Result<(), OptimError> {
        if self.max_iter == 0 {
            return Err(invalid("max_iter", "must be at least 1"));
        }
        for (name, v) in [("xtol", self.xtol), ("ftol", self.ftol), ("gtol", self.gtol)] {
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(name, format!("must be a finite non-negative number, got {v}")));
            }
        }
        Ok(())
    }
}

pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> OptimError {
    OptimError::InvalidOption {
        name,
        reason: reason.into(),
    }
}

pub(crate) fn validate_step(step: f64) -> Result<(), OptimError> {
    if step > 0.0 && step.is_finite() {
        Ok(())
    } else {
        Err(invalid("step", format!("must be positive and finite, got {step}")))
    }
}

// Whether `direction` at the current iterate points downhill.
pub(crate) fn is_descent(state: &LineSearchState) -> bool {
    let slope = state.direction.frob_dot(&state.cur_grad);
    slope < 0.0 && slope.is_finite()
}

/// Outcome of the last `solve`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolveReport {
    pub status: Status,
    pub iterations: usize,
    pub loss: f64,
    pub grad_norm: f64,
    pub func_evals: usize,
    pub grad_evals: usize,
}

impl SolveReport {
    /// Pairs the report with the final point, as `Ok` only when the solve converged.
    pub fn into_result(self, final_point: Array2<f64>) -> Result<Solution, OptimError> {
        let solution = Solution {
            final_point,
            final_value: self.loss,
            final_gradient_norm: self.grad_norm,
            iterations: self.iterations,
            func_evals: self.func_evals,
            grad_evals: self.grad_evals,
        };
        match self.status {
            Status::Converged => Ok(solution),
            Status::LineSearchFailed => Err(OptimError::LineSearchFailed {
                last_solution: Box::new(solution),
            }),
            Status::NumericalError => Err(OptimError::NumericalError {
                last_solution: Box::new(solution),
            }),
            Status::MaxIterReached | Status::Initialized | Status::Iterating => {
                Err(OptimError::MaxIterationsReached {
                    last_solution: Box::new(solution),
                })
            }
        }
    }
}

/// A summary of a successful optimization run.
///
/// For non-convex objectives the point is a stationary point, not necessarily a minimum.
#[derive(Debug, Clone)]
pub struct Solution {
    /// The point at which the minimum value was found.
    pub final_point: Array2<f64>,
    /// The objective value at `final_point`.
    pub final_value: f64,
    /// The norm of the gradient (or gradient mapping) at the final point.
    pub final_gradient_norm: f64,
    /// The total number of iterations performed.
    pub iterations: usize,
    /// The total number of times the objective function was evaluated.
    pub func_evals: usize,
    /// The total number of times the gradient was evaluated.
    pub grad_evals: usize,
}

/// Read access to the outcome of the last solve.
pub trait Solver {
    fn report(&self) -> &SolveReport;

    fn status(&self) -> Status {
        self.report().status
    }

    fn success(&self) -> bool {
        self.status() == Status::Converged
    }

    fn n_iter(&self) -> usize {
        self.report().iterations
    }
}

// Per-solve bookkeeping: stop tests, diagnostics and the final report.
pub(crate) struct IterationMonitor<'a> {
    name: &'static str,
    conv: ConvergenceParams,
    sink: &'a mut dyn Diagnostics,
    iterations: usize,
}

impl<'a> IterationMonitor<'a> {
    pub(crate) fn new(
        name: &'static str,
        conv: ConvergenceParams,
        sink: &'a mut dyn Diagnostics,
    ) -> Self {
        Self {
            name,
            conv,
            sink,
            iterations: 0,
        }
    }

    // Checks the freshly evaluated starting point.
    pub(crate) fn check_start(&mut self, state: &LineSearchState) -> Option<Status> {
        let grad_norm = state.grad_norm();
        if !state.cur_loss.is_finite() || !grad_norm.is_finite() {
            log::warn!("[{}] Non-finite loss or gradient at the starting point.", self.name);
            return Some(Status::NumericalError);
        }
        if grad_norm < SQRT_EPS {
            log::info!("[{}] Starting point is already stationary.", self.name);
            return Some(Status::Converged);
        }
        None
    }

    // Records an accepted step and decides whether to stop.
    pub(crate) fn after_search(
        &mut self,
        iter: usize,
        state: &LineSearchState,
        line_search_ok: bool,
    ) -> Option<Status> {
        self.iterations = iter;
        let record = IterationRecord {
            solver: self.name,
            iter,
            loss: state.cur_loss,
            step: state.step,
            grad_norm: state.grad_norm(),
            x_diff_norm: state.point_diff_norm(),
            f_diff: state.relative_loss_diff(),
        };
        self.sink.on_iteration(&record);

        if !record.loss.is_finite() || !record.grad_norm.is_finite() {
            log::warn!("[{}] Non-finite loss or gradient at iteration {}.", self.name, iter);
            return Some(Status::NumericalError);
        }
        if self.conv.is_converged(record.x_diff_norm, record.f_diff, record.grad_norm) {
            return Some(Status::Converged);
        }
        if !line_search_ok && state.cur_loss >= state.prev_loss {
            log::warn!(
                "[{}] Line search failed without decreasing the loss at iteration {}.",
                self.name,
                iter
            );
            return Some(Status::LineSearchFailed);
        }
        None
    }

    // Builds the report. A solve cut short by the iteration limit or a failed search ends on
    // the last accepted iterate, which sits in `prev_*`.
    pub(crate) fn finish(self, status: Status, state: &mut LineSearchState) -> SolveReport {
        if matches!(status, Status::MaxIterReached | Status::LineSearchFailed) {
            state.rewind();
        }
        self.sink.on_finish(self.name, status, self.iterations, state.cur_loss);
        match status {
            Status::Converged => log::debug!(
                "[{}] Converged after {} iterations (loss {:.6e}).",
                self.name,
                self.iterations,
                state.cur_loss
            ),
            _ => log::warn!(
                "[{}] Stopped after {} iterations: {}.",
                self.name,
                self.iterations,
                status
            ),
        }
        SolveReport {
            status,
            iterations: self.iterations,
            loss: state.cur_loss,
            grad_norm: state.grad_norm(),
            func_evals: state.func_evals(),
            grad_evals: state.grad_evals(),
        }
    }
}
