//! Limited-memory BFGS.

use ndarray::Array2;

use super::{
    ConvergenceParams, IterationMonitor, Solution, SolveReport, Solver, Status, invalid, is_descent,
    validate_step,
};
use crate::diagnostics::{Diagnostics, NoopSink};
use crate::error::OptimError;
use crate::line_search::{LineSearch, MoreThuente};
use crate::problem::{GradProblem, Smooth};
use crate::quasi_newton::CurvatureHistory;
use crate::state::LineSearchState;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LbfgsOptions {
    /// Number of curvature pairs kept (default: 4).
    pub memory: usize,
    /// Initial step for gradient steps (default: 1e-2).
    pub step: f64,
    pub convergence: ConvergenceParams,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            memory: 4,
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

impl LbfgsOptions {
    pub fn validate(&self) -> Result<(), OptimError> {
        if self.memory == 0 {
            return Err(invalid("memory", "must be at least 1"));
        }
        validate_step(self.step)?;
        self.convergence.validate()
    }
}

/// L-BFGS: the two-loop recursion over the last `memory` curvature pairs, with the initial
/// inverse Hessian scaled by `sᵀy / yᵀy` of the newest pair.
///
/// Iterations without a usable pair (the first one, or one whose `sᵀy` is too small) take a
/// plain gradient step of length `step`.
pub struct Lbfgs<L = MoreThuente> {
    pub options: LbfgsOptions,
    line_search: L,
    diagnostics: Box<dyn Diagnostics>,
    report: SolveReport,
}

impl Lbfgs {
    pub fn new() -> Self {
        Self::with_options(LbfgsOptions::default())
    }

    pub fn with_options(options: LbfgsOptions) -> Self {
        Self {
            options,
            line_search: MoreThuente::default(),
            diagnostics: Box::new(NoopSink),
            report: SolveReport::default(),
        }
    }
}

impl Default for Lbfgs {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LineSearch> Lbfgs<L> {
    pub fn with_line_search<L2: LineSearch>(self, line_search: L2) -> Lbfgs<L2> {
        Lbfgs {
            options: self.options,
            line_search,
            diagnostics: self.diagnostics,
            report: self.report,
        }
    }

    pub fn with_memory(mut self, memory: usize) -> Self {
        self.options.memory = memory;
        self
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
        debug_assert!(self.validate().is_ok(), "invalid L-BFGS options");
        self.report.status = Status::Iterating;
        let conv = self.options.convergence;
        let problem = &mut Smooth(problem);
        let mut state = LineSearchState::new(x, false);
        state.step = self.options.step;
        state.evaluate_loss(problem);
        state.evaluate_gradient(problem);
        let mut history = CurvatureHistory::new(self.options.memory.max(1));

        let mut monitor = IterationMonitor::new("L-BFGS", conv, self.diagnostics.as_mut());
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
                if history.push_from_state(&state) {
                    let gamma = history.gamma();
                    history.two_loop(&state.cur_grad, gamma, &mut state.direction);
                    if is_descent(&state) {
                        state.step = 1.0;
                    } else {
                        log::warn!(
                            "[L-BFGS] Non-descent direction; clearing history and using -g."
                        );
                        history.clear();
                        state.set_direction_neg_grad();
                        state.step = self.options.step;
                    }
                } else {
                    log::debug!(
                        "[L-BFGS] Rejected curvature pair at iteration {}; using -g.",
                        iter
                    );
                    state.set_direction_neg_grad();
                    state.step = self.options.step;
                }
                state.flush();
            }
            Status::MaxIterReached
        };
        self.report = monitor.finish(status, &mut state);
        std::mem::swap(x, &mut state.cur_x);
        state.cur_loss
    }
}

impl<L> Solver for Lbfgs<L> {
    fn report(&self) -> &SolveReport {
        &self.report
    }
}
