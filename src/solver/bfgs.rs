//! Full-memory BFGS with a dense inverse-Hessian approximation.

use ndarray::Array2;

use super::{
    ConvergenceParams, IterationMonitor, Solution, SolveReport, Solver, Status, is_descent,
    validate_step,
};
use crate::diagnostics::{Diagnostics, NoopSink};
use crate::error::OptimError;
use crate::line_search::{LineSearch, MoreThuente};
use crate::problem::{GradProblem, Smooth};
use crate::quasi_newton::InverseHessian;
use crate::state::LineSearchState;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BfgsOptions {
    /// Initial step for gradient steps: the first iteration and every reset (default: 1e-2).
    pub step: f64,
    pub convergence: ConvergenceParams,
}

impl Default for BfgsOptions {
    fn default() -> Self {
        Self {
            step: 1e-2,
            convergence: ConvergenceParams {
                max_iter: 100,
                xtol: 1e-6,
                ftol: 1e-6,
                gtol: 1e-4,
            },
        }
    }
}

impl BfgsOptions {
    pub fn validate(&self) -> Result<(), OptimError> {
        validate_step(self.step)?;
        self.convergence.validate()
    }
}

/// BFGS with `d = −H·g` and `H` updated in place after every accepted step.
///
/// The first update starts from `(sᵀy / yᵀy)·I` instead of `I`. Whenever `−H·g` fails to be a
/// descent direction, `H` is reset and the iteration takes a gradient step. Costs `O((nk)²)`
/// memory; see [`Lbfgs`](super::lbfgs::Lbfgs) for large problems.
pub struct Bfgs<L = MoreThuente> {
    pub options: BfgsOptions,
    line_search: L,
    diagnostics: Box<dyn Diagnostics>,
    report: SolveReport,
    inv_hessian: Option<InverseHessian>,
}

impl Bfgs {
    pub fn new() -> Self {
        Self::with_options(BfgsOptions::default())
    }

    pub fn with_options(options: BfgsOptions) -> Self {
        Self {
            options,
            line_search: MoreThuente::default(),
            diagnostics: Box::new(NoopSink),
            report: SolveReport::default(),
            inv_hessian: None,
        }
    }
}

impl Default for Bfgs {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LineSearch> Bfgs<L> {
    pub fn with_line_search<L2: LineSearch>(self, line_search: L2) -> Bfgs<L2> {
        Bfgs {
            options: self.options,
            line_search,
            diagnostics: self.diagnostics,
            report: self.report,
            inv_hessian: self.inv_hessian,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.options.step = step;
        self
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.options.convergence.max_iter = max_iter;
        self
    }

    pub fn with_tolerances(mut self, xtol: f64, ftol: f64, gtol: f64) -> Self {
        self.options.convergence.xtol = xtol;
        self.options.convergence.ftol = ftol;
        self.options.convergence.gtol = gtol;
        self
    }

    pub fn with_diagnostics<D: Diagnostics + 'static>(mut self, sink: D) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    /// The inverse-Hessian approximation left by the last solve.
    pub fn inverse_hessian(&self) -> Option<&InverseHessian> {
        self.inv_hessian.as_ref()
    }

    pub fn validate(&self) -> Result<(), OptimError> {
        self.options.validate()?;
        self.line_search.validate()
    }

    pub fn run<P: GradProblem + ?Sized>(
        &mut self,
        problem: &mut P,
        x0: Array2<f64>,
    ) -> Result<Solution, OptimError> {
        self.validate()?;
        let mut x = x0;
        self.solve(problem, &mut x);
        self.report.into_result(x)
    }

    pub fn solve<P: GradProblem + ?Sized>(&mut self, problem: &mut P, x: &mut Array2<f64>) -> f64 {
        debug_assert!(self.validate().is_ok(), "invalid BFGS options");
        self.report.status = Status::Iterating;
        let conv = self.options.convergence;
        let problem = &mut Smooth(problem);
        let mut state = LineSearchState::new(x, false);
        state.step = self.options.step;
        state.evaluate_loss(problem);
        state.evaluate_gradient(problem);

        // Reuse the matrix of a previous solve of the same size.
        let n = state.cur_x.len();
        let mut h = match self.inv_hessian.take() {
            Some(mut h) if h.matrix().nrows() == n => {
                h.reset();
                h
            }
            _ => InverseHessian::new(n),
        };
        h.scale_on_next_update();

        let mut monitor = IterationMonitor::new("BFGS", conv, self.diagnostics.as_mut());
        let status = 'solve: {
            if let Some(status) = monitor.check_start(&state) {
                break 'solve status;
            }
            state.set_direction_neg_grad();
            state.flush();
            self.line_search.init(&state);
            for iter in 1..=conv.max_iter {
                self.line_search.search(problem, &mut state);
                if let Some(status) =
                    monitor.after_search(iter, &state, self.line_search.success())
                {
                    break 'solve status;
                }
                if !h.update_from_state(&state) {
                    log::debug!("[BFGS] Skipped update at iteration {}: sᵀy too small.", iter);
                }
                h.direction(&state.cur_grad, &mut state.direction);
                if is_descent(&state) {
                    state.step = 1.0;
                } else {
                    log::warn!("[BFGS] Non-descent direction; resetting to -g and H = I.");
                    h.reset();
                    h.scale_on_next_update();
                    state.set_direction_neg_grad();
                    state.step = self.options.step;
                }
                state.flush();
            }
            Status::MaxIterReached
        };
        self.report = monitor.finish(status, &mut state);
        self.inv_hessian = Some(h);
        std::mem::swap(x, &mut state.cur_x);
        state.cur_loss
    }
}

impl<L> Solver for Bfgs<L> {
    fn report(&self) -> &SolveReport {
        &self.report
    }
}
