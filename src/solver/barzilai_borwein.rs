//! Barzilai-Borwein spectral gradient method.

use ndarray::Array2;

use super::{
    ConvergenceParams, IterationMonitor, Solution, SolveReport, Solver, Status, validate_step,
};
use crate::diagnostics::{Diagnostics, NoopSink};
use crate::error::OptimError;
use crate::line_search::{LineSearch, ZhangHager};
use crate::problem::{Composite, GradProblem, LineSearchProblem, ProxProblem, Smooth};
use crate::recorder::Recorder;
use crate::scheduler::BarzilaiBorweinStep;
use crate::state::LineSearchState;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BarzilaiBorweinOptions {
    /// Step of the first iteration, and fallback when `sᵀy` vanishes (default: 1e-2).
    pub step: f64,
    pub convergence: ConvergenceParams,
    /// Window of the loss recorder (default: 8).
    pub record_window: usize,
}

impl Default for BarzilaiBorweinOptions {
    fn default() -> Self {
        Self {
            step: 1e-2,
            convergence: ConvergenceParams {
                max_iter: 100,
                xtol: 1e-4,
                ftol: 1e-4,
                gtol: 1e-4,
            },
            record_window: Recorder::DEFAULT_WINDOW,
        }
    }
}

impl BarzilaiBorweinOptions {
    pub fn validate(&self) -> Result<(), OptimError> {
        validate_step(self.step)?;
        self.convergence.validate()
    }
}

/// Gradient steps with alternating Barzilai-Borwein lengths, safeguarded by a non-monotone
/// line search.
///
/// The BB step only proposes the initial trial; the line search still decides what is
/// accepted, and the proposal is clamped to the search's step bounds.
pub struct BarzilaiBorwein<L = ZhangHager> {
    pub options: BarzilaiBorweinOptions,
    line_search: L,
    diagnostics: Box<dyn Diagnostics>,
    recorder: Recorder,
    report: SolveReport,
}

impl BarzilaiBorwein {
    pub fn new() -> Self {
        Self::with_options(BarzilaiBorweinOptions::default())
    }

    pub fn with_options(options: BarzilaiBorweinOptions) -> Self {
        Self {
            options,
            line_search: ZhangHager::default(),
            diagnostics: Box::new(NoopSink),
            recorder: Recorder::new(options.record_window),
            report: SolveReport::default(),
        }
    }
}

impl Default for BarzilaiBorwein {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LineSearch> BarzilaiBorwein<L> {
    pub fn with_line_search<L2: LineSearch>(self, line_search: L2) -> BarzilaiBorwein<L2> {
        BarzilaiBorwein {
            options: self.options,
            line_search,
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

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn validate(&self) -> Result<(), OptimError> {
        self.options.validate()?;
        self.line_search.validate()
    }

    pub fn solve<P: GradProblem + ?Sized>(&mut self, problem: &mut P, x: &mut Array2<f64>) -> f64 {
        self.drive(&mut Smooth(problem), x)
    }

    /// Spectral proximal gradient on a composite problem.
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

    fn drive<Q: LineSearchProblem>(&mut self, problem: &mut Q, x: &mut Array2<f64>) -> f64 {
        debug_assert!(self.validate().is_ok(), "invalid Barzilai-Borwein options");
        self.report.status = Status::Iterating;
        let conv = self.options.convergence;
        let bounds = self.line_search.bounds();
        let mut state = LineSearchState::new(x, Q::COMPOSITE);
        state.step = self.options.step;
        state.evaluate_loss(problem);
        state.evaluate_gradient(problem);
        self.recorder = Recorder::new(self.options.record_window);
        self.recorder.record(0, state.cur_loss, &state.cur_x);

        let mut monitor = IterationMonitor::new("BB", conv, self.diagnostics.as_mut());
        let status = 'solve: {
            if let Some(status) = monitor.check_start(&state) {
                break 'solve status;
            }
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
                state.step = BarzilaiBorweinStep::step(iter, &state)
                    .map_or(self.options.step, |step| bounds.clamp(step));
                state.set_direction_neg_grad();
                state.flush();
            }
            Status::MaxIterReached
        };
        self.report = monitor.finish(status, &mut state);
        std::mem::swap(x, &mut state.cur_x);
        state.cur_loss
    }
}

impl<L> Solver for BarzilaiBorwein<L> {
    fn report(&self) -> &SolveReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_search::test_problems::WeightedQuadratic;
    use crate::line_search::{Armijo, ZhangHagerParams};
    use crate::solver::gradient_descent::GradientDescent;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_bb_converges_on_ill_conditioned_bowl() {
        let mut p = WeightedQuadratic(vec![1.0, 50.0]);
        let mut x = array![[1.0, 1.0]];
        let mut solver = BarzilaiBorwein::new().with_tolerances(1e-8, 1e-8, 1e-6);
        solver.solve(&mut p, &mut x);
        assert!(solver.success(), "status {:?}", solver.status());
        assert_that!(&x[[0, 0]].abs()).is_less_than(1e-5);
        assert_that!(&x[[0, 1]].abs()).is_less_than(1e-5);
    }

    #[test]
    fn test_bb_beats_plain_gradient_descent() {
        let weights = vec![1.0, 50.0];
        let mut bb = BarzilaiBorwein::new()
            .with_line_search(Armijo::nonmonotone(5))
            .with_max_iterations(500);
        let mut x_bb = array![[1.0, 1.0]];
        bb.solve(&mut WeightedQuadratic(weights.clone()), &mut x_bb);

        let mut gd = GradientDescent::new()
            .with_line_search(Armijo::default())
            .with_step(0.01)
            .with_tolerances(1e-4, 1e-4, 1e-4);
        let mut x_gd = array![[1.0, 1.0]];
        gd.solve(&mut WeightedQuadratic(weights), &mut x_gd);

        assert!(bb.success());
        assert_that!(&bb.n_iter()).is_less_than(gd.n_iter());
    }

    #[test]
    fn test_invalid_line_search_parameters_are_rejected() {
        let mut solver = BarzilaiBorwein::new().with_line_search(ZhangHager::new(ZhangHagerParams {
            gamma: 2.0,
            ..ZhangHagerParams::default()
        }));
        let result = solver.run(&mut WeightedQuadratic(vec![1.0]), array![[1.0]]);
        assert!(matches!(result, Err(OptimError::InvalidOption { name: "zhang_hager", .. })));
    }
}
