//! First-order descent with pluggable line search, accelerator and step schedule.

use ndarray::Array2;

use super::{
    ConvergenceParams, IterationMonitor, Solution, SolveReport, Solver, Status, validate_step,
};
use crate::accelerator::{Accelerator, PlainGradient};
use crate::diagnostics::{Diagnostics, NoopSink};
use crate::error::OptimError;
use crate::line_search::{FixedStep, LineSearch};
use crate::problem::{Composite, GradProblem, LineSearchProblem, ProxProblem, Smooth};
use crate::recorder::Recorder;
use crate::scheduler::{ConstantStep, StepScheduler};
use crate::state::LineSearchState;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GradientDescentOptions {
    /// Initial step handed to the first line search (default: 1e-2).
    pub step: f64,
    pub convergence: ConvergenceParams,
    /// Window of the loss recorder (default: 8).
    pub record_window: usize,
}

impl Default for GradientDescentOptions {
    fn default() -> Self {
        Self {
            step: 1e-2,
            convergence: ConvergenceParams {
                max_iter: 1000,
                xtol: 1e-6,
                ftol: 1e-4,
                gtol: 1e-4,
            },
            record_window: Recorder::DEFAULT_WINDOW,
        }
    }
}

impl GradientDescentOptions {
    pub fn validate(&self) -> Result<(), OptimError> {
        validate_step(self.step)?;
        self.convergence.validate()
    }
}

/// Gradient descent, or a momentum/adaptive variant, for smooth and composite problems.
///
/// ```
/// use ndarray::{Array2, array};
/// use wolfe_optim::problem::{GradProblem, Problem};
/// use wolfe_optim::line_search::Armijo;
/// use wolfe_optim::solver::{Solver, gradient_descent::GradientDescent};
///
/// struct Shifted;
/// impl Problem for Shifted {
///     fn loss(&mut self, x: &Array2<f64>) -> f64 {
///         (x[[0, 0]] - 3.0).powi(2)
///     }
/// }
/// impl GradProblem for Shifted {
///     fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
///         out[[0, 0]] = 2.0 * (x[[0, 0]] - 3.0);
///     }
/// }
///
/// let mut solver = GradientDescent::new()
///     .with_line_search(Armijo::default())
///     .with_step(0.1);
/// let mut x = array![[0.0]];
/// solver.solve(&mut Shifted, &mut x);
/// assert!(solver.success());
/// assert!((x[[0, 0]] - 3.0).abs() < 1e-5);
/// ```
pub struct GradientDescent<L = FixedStep, A = PlainGradient, S = ConstantStep> {
    pub options: GradientDescentOptions,
    line_search: L,
    accelerator: A,
    scheduler: S,
    diagnostics: Box<dyn Diagnostics>,
    recorder: Recorder,
    report: SolveReport,
}

impl GradientDescent {
    pub fn new() -> Self {
        Self::with_options(GradientDescentOptions::default())
    }

    pub fn with_options(options: GradientDescentOptions) -> Self {
        Self {
            options,
            line_search: FixedStep::default(),
            accelerator: PlainGradient,
            scheduler: ConstantStep,
            diagnostics: Box::new(NoopSink),
            recorder: Recorder::new(options.record_window),
            report: SolveReport::default(),
        }
    }
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LineSearch, A: Accelerator, S: StepScheduler> GradientDescent<L, A, S> {
    pub fn with_line_search<L2: LineSearch>(self, line_search: L2) -> GradientDescent<L2, A, S> {
        GradientDescent {
            options: self.options,
            line_search,
            accelerator: self.accelerator,
            scheduler: self.scheduler,
            diagnostics: self.diagnostics,
            recorder: self.recorder,
            report: self.report,
        }
    }

    pub fn with_accelerator<A2: Accelerator>(self, accelerator: A2) -> GradientDescent<L, A2, S> {
        GradientDescent {
            options: self.options,
            line_search: self.line_search,
            accelerator,
            scheduler: self.scheduler,
            diagnostics: self.diagnostics,
            recorder: self.recorder,
            report: self.report,
        }
    }

    pub fn with_scheduler<S2: StepScheduler>(self, scheduler: S2) -> GradientDescent<L, A, S2> {
        GradientDescent {
            options: self.options,
            line_search: self.line_search,
            accelerator: self.accelerator,
            scheduler,
            diagnostics: self.diagnostics,
            recorder: self.recorder,
            report: self.report,
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

    pub fn line_search(&self) -> &L {
        &self.line_search
    }

    /// Loss history of the last solve.
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Minimizes a smooth problem from `x`, leaving the final iterate in `x`.
    pub fn solve<P: GradProblem + ?Sized>(&mut self, problem: &mut P, x: &mut Array2<f64>) -> f64 {
        self.drive(&mut Smooth(problem), x)
    }

    /// Proximal gradient descent on a composite problem.
    pub fn solve_composite<P: ProxProblem + ?Sized>(
        &mut self,
        problem: &mut P,
        x: &mut Array2<f64>,
    ) -> f64 {
        self.drive(&mut Composite(problem), x)
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

    pub fn run_composite<P: ProxProblem + ?Sized>(
        &mut self,
        problem: &mut P,
        x0: Array2<f64>,
    ) -> Result<Solution, OptimError> {
        self.validate()?;
        let mut x = x0;
        self.solve_composite(problem, &mut x);
        self.report.into_result(x)
    }

    pub fn validate(&self) -> Result<(), OptimError> {
        self.options.validate()?;
        self.line_search.validate()
    }

    fn drive<Q: LineSearchProblem>(&mut self, problem: &mut Q, x: &mut Array2<f64>) -> f64 {
        debug_assert!(self.validate().is_ok(), "invalid gradient descent options");
        self.report.status = Status::Iterating;
        let conv = self.options.convergence;
        let mut state = LineSearchState::new(x, Q::COMPOSITE);
        state.step = self.options.step;
        state.evaluate_loss(problem);
        state.evaluate_gradient(problem);
        self.recorder = Recorder::new(self.options.record_window);
        self.recorder.record(0, state.cur_loss, &state.cur_x);

        let mut monitor = IterationMonitor::new("GD", conv, self.diagnostics.as_mut());
        let status = 'solve: {
            if let Some(status) = monitor.check_start(&state) {
                break 'solve status;
            }
            self.accelerator.init(&state);
            state.set_direction_neg_grad();
            state.flush();
            self.line_search.init(&state);
            for iter in 1..=conv.max_iter {
                self.line_search.search(problem, &mut state);
                self.recorder.record(iter, state.cur_loss, &state.cur_x);
                if let Some(status) =
                    monitor.after_search(iter, &state, self.line_search.success())
                {
                    break 'solve status;
                }
                self.accelerator.update(iter, problem, &mut state);
                self.scheduler.update(iter, &mut state);
                state.flush();
            }
            Status::MaxIterReached
        };
        self.report = monitor.finish(status, &mut state);
        std::mem::swap(x, &mut state.cur_x);
        state.cur_loss
    }
}

impl<L, A, S> Solver for GradientDescent<L, A, S> {
    fn report(&self) -> &SolveReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{Adam, Nesterov};
    use crate::line_search::Armijo;
    use crate::line_search::test_problems::WeightedQuadratic;
    use crate::scheduler::ExponentialDecay;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_fixed_step_converges_on_bowl() {
        let mut p = WeightedQuadratic(vec![1.0, 2.0]);
        let mut x = array![[1.0, -1.0]];
        let mut solver = GradientDescent::new().with_step(0.1);
        let loss = solver.solve(&mut p, &mut x);
        assert!(solver.success());
        assert_that!(&loss).is_less_than(1e-8);
        assert_that!(&solver.recorder().best_loss()).is_close_to(loss, 1e-15);
    }

    #[test]
    fn test_begin_at_minimum_terminates_immediately() {
        let mut p = WeightedQuadratic(vec![1.0]);
        let mut x = array![[0.0]];
        let mut solver = GradientDescent::new();
        solver.solve(&mut p, &mut x);
        assert_eq!(solver.status(), Status::Converged);
        assert_eq!(solver.n_iter(), 0);
    }

    #[test]
    fn test_max_iterations_error_is_returned() {
        let mut p = WeightedQuadratic(vec![1.0]);
        let result = GradientDescent::new()
            .with_step(1e-4)
            .with_max_iterations(5)
            .run(&mut p, array![[10.0]]);
        match result {
            Err(OptimError::MaxIterationsReached { last_solution }) => {
                assert_eq!(last_solution.iterations, 5);
                assert_that!(&last_solution.final_point[[0, 0]]).is_less_than(10.0);
            }
            other => panic!("expected MaxIterationsReached, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_step_is_rejected() {
        let mut p = WeightedQuadratic(vec![1.0]);
        let result = GradientDescent::new().with_step(-1.0).run(&mut p, array![[1.0]]);
        assert!(matches!(result, Err(OptimError::InvalidOption { name: "step", .. })));
    }

    #[test]
    fn test_nesterov_with_armijo_converges() {
        let mut p = WeightedQuadratic(vec![1.0, 10.0]);
        let mut x = array![[5.0, 5.0]];
        let mut solver = GradientDescent::new()
            .with_line_search(Armijo::default())
            .with_accelerator(Nesterov)
            .with_step(0.05)
            .with_max_iterations(300);
        let loss = solver.solve(&mut p, &mut x);
        assert_that!(&loss).is_less_than(1e-2);
        assert_that!(&solver.report().func_evals).is_greater_than(300);
    }

    #[test]
    fn test_adam_with_decay_makes_progress() {
        let mut p = WeightedQuadratic(vec![1.0, 1.0]);
        let mut x = array![[2.0, -2.0]];
        let mut solver = GradientDescent::new()
            .with_accelerator(Adam::default())
            .with_scheduler(ExponentialDecay { decay: 0.99 })
            .with_step(0.1)
            .with_max_iterations(300);
        let loss = solver.solve(&mut p, &mut x);
        assert_that!(&loss).is_less_than(0.1);
    }
}
