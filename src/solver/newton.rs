//! Line-search Newton methods on problems with a dense Hessian.
//!
//! [`NewtonCg`] solves `H·d = −g` inexactly with conjugate gradient, [`NewtonLdlt`] exactly with
//! a symmetric indefinite factorization. Both fall back to `−g` when the Newton system yields
//! no descent direction.

use ndarray::{Array1, Array2};

use super::{
    ConvergenceParams, IterationMonitor, Solution, SolveReport, Solver, Status, invalid, is_descent,
};
use crate::diagnostics::{Diagnostics, NoopSink};
use crate::error::OptimError;
use crate::line_search::{LineSearch, MoreThuente};
use crate::linalg::{CgStatus, Ldlt, conjugate_gradient, ensure_dim, unflatten_into};
use crate::problem::{HessProblem, Smooth};
use crate::state::LineSearchState;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NewtonOptions {
    pub convergence: ConvergenceParams,
    /// Conjugate-gradient iterations per Newton step; `None` uses the problem dimension.
    /// Ignored by [`NewtonLdlt`].
    pub cg_max_iter: Option<usize>,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            convergence: ConvergenceParams {
                max_iter: 100,
                xtol: 1e-10,
                ftol: 1e-10,
                gtol: 1e-6,
            },
            cg_max_iter: None,
        }
    }
}

impl NewtonOptions {
    /// Defaults for [`NewtonLdlt`].
    pub fn ldlt() -> Self {
        Self {
            convergence: ConvergenceParams {
                max_iter: 100,
                xtol: 1e-10,
                ftol: 1e-6,
                gtol: 1e-6,
            },
            cg_max_iter: None,
        }
    }

    pub fn validate(&self) -> Result<(), OptimError> {
        if self.cg_max_iter == Some(0) {
            return Err(invalid("cg_max_iter", "must be at least 1"));
        }
        self.convergence.validate()
    }
}

// Solves the Newton system at the current iterate. Returns `false` when the caller should use
// `−g` instead.
trait NewtonSystem {
    const NAME: &'static str;

    fn direction(&mut self, hess: &Array2<f64>, rhs: &Array1<f64>, out: &mut Array1<f64>) -> bool;
}

struct CgSystem {
    max_iter: Option<usize>,
    tol: f64,
}

impl NewtonSystem for CgSystem {
    const NAME: &'static str = "Newton-CG";

    fn direction(&mut self, hess: &Array2<f64>, rhs: &Array1<f64>, out: &mut Array1<f64>) -> bool {
        let max_iter = self.max_iter.unwrap_or(rhs.len()).max(1);
        let outcome = conjugate_gradient(
            |p, hp| ndarray::linalg::general_mat_vec_mul(1.0, hess, p, 0.0, hp),
            rhs,
            out,
            self.tol,
            max_iter,
        );
        match outcome.status {
            CgStatus::NegativeCurvature if outcome.iterations == 0 => {
                log::debug!("[Newton-CG] Negative curvature along -g; using -g.");
                false
            }
            CgStatus::NegativeCurvature => {
                log::debug!(
                    "[Newton-CG] Negative curvature after {} CG iterations; direction truncated.",
                    outcome.iterations
                );
                true
            }
            CgStatus::MaxIter | CgStatus::Converged => true,
        }
    }
}

struct LdltSystem;

impl NewtonSystem for LdltSystem {
    const NAME: &'static str = "Newton-LDLT";

    fn direction(&mut self, hess: &Array2<f64>, rhs: &Array1<f64>, out: &mut Array1<f64>) -> bool {
        match Ldlt::factor(hess) {
            Some(factor) => {
                *out = factor.solve(rhs);
                true
            }
            None => {
                log::warn!("[Newton-LDLT] Singular Hessian; using -g.");
                false
            }
        }
    }
}

fn newton_solve<P, L, K>(
    options: &NewtonOptions,
    line_search: &mut L,
    system: &mut K,
    sink: &mut dyn Diagnostics,
    problem: &mut P,
    x: &mut Array2<f64>,
) -> (SolveReport, f64)
where
    P: HessProblem + ?Sized,
    L: LineSearch,
    K: NewtonSystem,
{
    let conv = options.convergence;
    let mut state = LineSearchState::new(x, false);
    {
        let mut smooth = Smooth(&mut *problem);
        state.evaluate_loss(&mut smooth);
        state.evaluate_gradient(&mut smooth);
    }
    let n = state.cur_x.len();
    let mut hess = Array2::<f64>::zeros((n, n));
    let mut rhs = Array1::<f64>::zeros(n);
    let mut sol = Array1::<f64>::zeros(n);

    // Fills `state.direction` for the iterate in `cur_*`.
    let mut next_direction = |problem: &mut P, state: &mut LineSearchState| {
        ensure_dim(&mut hess, (n, n));
        hess.fill(0.0);
        problem.hess(&state.cur_x, &mut hess);
        for (r, g) in rhs.iter_mut().zip(state.cur_grad.iter()) {
            *r = -g;
        }
        ensure_dim(&mut state.direction, state.cur_grad.dim());
        let solved = system.direction(&hess, &rhs, &mut sol) && sol.len() == n;
        if solved {
            unflatten_into(&sol, &mut state.direction);
        }
        if !solved || !is_descent(state) {
            if solved {
                log::warn!("[{}] Newton direction is not a descent direction; using -g.", K::NAME);
            }
            state.set_direction_neg_grad();
        }
        state.step = 1.0;
    };

    let mut monitor = IterationMonitor::new(K::NAME, conv, sink);
    let status = 'solve: {
        if let Some(status) = monitor.check_start(&state) {
            break 'solve status;
        }
        next_direction(problem, &mut state);
        state.flush();
        line_search.init(&state);
        for iter in 1..=conv.max_iter {
            line_search.search(&mut Smooth(&mut *problem), &mut state);
            if let Some(status) = monitor.after_search(iter, &state, line_search.success()) {
                break 'solve status;
            }
            next_direction(problem, &mut state);
            state.flush();
        }
        Status::MaxIterReached
    };
    let report = monitor.finish(status, &mut state);
    std::mem::swap(x, &mut state.cur_x);
    (report, state.cur_loss)
}

macro_rules! newton_solver {
    ($(#[$doc:meta])* $name:ident, $defaults:expr, $system:expr) => {
        $(#[$doc])*
        pub struct $name<L = MoreThuente> {
            pub options: NewtonOptions,
            line_search: L,
            diagnostics: Box<dyn Diagnostics>,
            report: SolveReport,
        }

        impl $name {
            pub fn new() -> Self {
                Self::with_options($defaults)
            }

            pub fn with_options(options: NewtonOptions) -> Self {
                Self {
                    options,
                    line_search: MoreThuente::default(),
                    diagnostics: Box::new(NoopSink),
                    report: SolveReport::default(),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<L: LineSearch> $name<L> {
            pub fn with_line_search<L2: LineSearch>(self, line_search: L2) -> $name<L2> {
                $name {
                    options: self.options,
                    line_search,
                    diagnostics: self.diagnostics,
                    report: self.report,
                }
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

            pub fn run<P: HessProblem + ?Sized>(
                &mut self,
                problem: &mut P,
                x0: Array2<f64>,
            ) -> Result<Solution, OptimError> {
                self.validate()?;
                let mut x = x0;
                self.solve(problem, &mut x);
                self.report.into_result(x)
            }

            pub fn solve<P: HessProblem + ?Sized>(
                &mut self,
                problem: &mut P,
                x: &mut Array2<f64>,
            ) -> f64 {
                debug_assert!(self.validate().is_ok(), "invalid Newton options");
                self.report.status = Status::Iterating;
                #[allow(clippy::redundant_closure_call)]
                let mut system = ($system)(&self.options);
                let (report, loss) = newton_solve(
                    &self.options,
                    &mut self.line_search,
                    &mut system,
                    self.diagnostics.as_mut(),
                    problem,
                    x,
                );
                self.report = report;
                loss
            }
        }

        impl<L> Solver for $name<L> {
            fn report(&self) -> &SolveReport {
                &self.report
            }
        }
    };
}

newton_solver!(
    /// Truncated Newton: CG on `H·d = −g` to a relative residual of `gtol`.
    ///
    /// Negative curvature met on the first CG iteration gives `−g`; met later, the partial CG
    /// solution is used.
    NewtonCg,
    NewtonOptions::default(),
    |options: &NewtonOptions| CgSystem {
        max_iter: options.cg_max_iter,
        tol: options.convergence.gtol,
    }
);

newton_solver!(
    /// Newton with an exact solve through a diagonal-pivoted `LDLᵀ` factorization.
    NewtonLdlt,
    NewtonOptions::ldlt(),
    |_: &NewtonOptions| LdltSystem
);
