//! Augmented Lagrangian method for `min f(x)` subject to `h(x) = 0`, `g(x) ≤ 0`.
//!
//! The problem owns its multipliers and penalty (in [`AlmMultipliers`]) and exposes the
//! augmented Lagrangian
//!
//! ```text
//! L(x) = f(x) + λᵀh(x) + ρ/2·‖h(x)‖² + 1/(2ρ)·(‖max(0, μ + ρ·g(x))‖² − ‖μ‖²)
//! ```
//!
//! through `loss`/`grad`. The outer loop here only adjusts `λ`, `μ`, `ρ` and the inner
//! tolerance; minimizing `L` is left to [`ConstrainedProblem::solve_subproblem`], which may
//! use any of the other solvers.

use ndarray::Array2;

use super::{Solution, SolveReport, Solver, Status, invalid};
use crate::diagnostics::{Diagnostics, IterationRecord, NoopSink};
use crate::error::OptimError;
use crate::linalg::{MatOps, ensure_dim};
use crate::problem::ConstrainedProblem;

/// Lagrange multipliers, penalty and inner tolerance shared between the outer loop and the
/// problem.
#[derive(Debug, Clone)]
pub struct AlmMultipliers {
    /// `λ`, one entry per equality constraint.
    pub eq: Array2<f64>,
    /// `μ ≥ 0`, one entry per inequality constraint.
    pub ineq: Array2<f64>,
    /// Penalty `ρ`.
    pub penalty: f64,
    /// Gradient tolerance the current subproblem should be solved to.
    pub gtol: f64,
}

impl AlmMultipliers {
    /// Zero multipliers for `eq_dim` equality and `ineq_dim` inequality constraints.
    pub fn new(eq_dim: (usize, usize), ineq_dim: (usize, usize)) -> Self {
        Self {
            eq: Array2::zeros(eq_dim),
            ineq: Array2::zeros(ineq_dim),
            penalty: AlmOptions::default().init_penalty,
            gtol: 1.0,
        }
    }

    /// `λ + ρ·h`, the equality part of `∇L` is `J_hᵀ` times this.
    pub fn shifted_eq(&self, h: &Array2<f64>) -> Array2<f64> {
        let rho = self.penalty;
        let mut out = self.eq.clone();
        out.zip_mut_with(h, |l, &hi| *l += rho * hi);
        out
    }

    /// `max(0, μ + ρ·g)`, the inequality part of `∇L` is `J_gᵀ` times this.
    pub fn shifted_ineq(&self, g: &Array2<f64>) -> Array2<f64> {
        let rho = self.penalty;
        let mut out = self.ineq.clone();
        out.zip_mut_with(g, |m, &gi| *m = (*m + rho * gi).max(0.0));
        out
    }

    /// The constraint terms of `L`, to be added to `f(x)`.
    pub fn penalty_term(&self, h: &Array2<f64>, g: &Array2<f64>) -> f64 {
        let rho = self.penalty;
        let eq: f64 = self
            .eq
            .iter()
            .zip(h.iter())
            .map(|(l, hi)| l * hi + 0.5 * rho * hi * hi)
            .sum();
        let ineq: f64 = self
            .ineq
            .iter()
            .zip(g.iter())
            .map(|(m, gi)| {
                let t = (m + rho * gi).max(0.0);
                (t * t - m * m) / (2.0 * rho)
            })
            .sum();
        eq + ineq
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlmOptions {
    /// Outer iterations (default: 20).
    pub max_iter: usize,
    /// Starting penalty `ρ₀` (default: 10).
    pub init_penalty: f64,
    /// Factor applied to `ρ` when the violation does not drop below `η` (default: 10).
    pub penalty_growth: f64,
    /// Exponent of the violation tolerance `η = 1/ρ^α` after a penalty increase (default: 0.5).
    pub alpha: f64,
    /// Exponent of the violation tolerance update `η ← η/ρ^β` after a multiplier update
    /// (default: 1).
    pub beta: f64,
    /// Final tolerance on the Lagrangian gradient (default: 1e-6).
    pub gtol: f64,
    /// Final tolerance on the constraint violation (default: 1e-6).
    pub cons_viol_tol: f64,
}

impl Default for AlmOptions {
    fn default() -> Self {
        Self {
            max_iter: 20,
            init_penalty: 10.0,
            penalty_growth: 10.0,
            alpha: 0.5,
            beta: 1.0,
            gtol: 1e-6,
            cons_viol_tol: 1e-6,
        }
    }
}

impl AlmOptions {
    pub fn validate(&self) -> Result<(), OptimError> {
        if self.max_iter == 0 {
            return Err(invalid("max_iter", "must be at least 1"));
        }
        if !(self.init_penalty.is_finite() && self.init_penalty > 0.0) {
            return Err(invalid(
                "init_penalty",
                format!("must be positive, got {}", self.init_penalty),
            ));
        }
        if !(self.penalty_growth.is_finite() && self.penalty_growth > 1.0) {
            return Err(invalid(
                "penalty_growth",
                format!("must be greater than 1, got {}", self.penalty_growth),
            ));
        }
        for (name, v) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("gtol", self.gtol),
            ("cons_viol_tol", self.cons_viol_tol),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(name, format!("must be a finite non-negative number, got {v}")));
            }
        }
        Ok(())
    }
}

/// Outer loop of the augmented Lagrangian method (Nocedal & Wright, Algorithm 17.4).
pub struct AugmentedLagrangian {
    pub options: AlmOptions,
    diagnostics: Box<dyn Diagnostics>,
    report: SolveReport,
    violation: f64,
}

impl AugmentedLagrangian {
    pub fn new() -> Self {
        Self::with_options(AlmOptions::default())
    }

    pub fn with_options(options: AlmOptions) -> Self {
        Self {
            options,
            diagnostics: Box::new(NoopSink),
            report: SolveReport::default(),
            violation: f64::INFINITY,
        }
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.options.max_iter = max_iter;
        self
    }

    pub fn with_tolerances(mut self, gtol: f64, cons_viol_tol: f64) -> Self {
        self.options.gtol = gtol;
        self.options.cons_viol_tol = cons_viol_tol;
        self
    }

    pub fn with_penalty(mut self, init_penalty: f64, penalty_growth: f64) -> Self {
        self.options.init_penalty = init_penalty;
        self.options.penalty_growth = penalty_growth;
        self
    }

    pub fn with_diagnostics<D: Diagnostics + 'static>(mut self, sink: D) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    /// Constraint violation `‖(h, max(g, −μ/ρ))‖` at the end of the last solve.
    pub fn violation(&self) -> f64 {
        self.violation
    }

    pub fn run<P: ConstrainedProblem + ?Sized>(
        &mut self,
        problem: &mut P,
        x0: Array2<f64>,
    ) -> Result<Solution, OptimError> {
        self.options.validate()?;
        let mut x = x0;
        self.solve(problem, &mut x);
        self.report.into_result(x)
    }

    /// Runs the outer loop from `x`, leaving the final iterate in `x` and the final multipliers
    /// in the problem. Returns the final augmented Lagrangian value.
    pub fn solve<P: ConstrainedProblem + ?Sized>(
        &mut self,
        problem: &mut P,
        x: &mut Array2<f64>,
    ) -> f64 {
        debug_assert!(self.options.validate().is_ok(), "invalid ALM options");
        self.report.status = Status::Iterating;
        let opts = self.options;

        let mut rho = opts.init_penalty;
        let mut eta = 1.0 / rho.powf(opts.alpha);
        let mut omega = 1.0 / rho;
        {
            let m = problem.multipliers_mut();
            m.penalty = rho;
            m.gtol = omega;
        }

        let mut h = Array2::zeros(problem.multipliers().eq.dim());
        let mut g = Array2::zeros(problem.multipliers().ineq.dim());
        let mut grad = Array2::zeros(x.dim());
        let mut prev_x = x.clone();
        let mut prev_loss = f64::INFINITY;
        let mut loss = f64::INFINITY;
        let mut grad_norm = f64::INFINITY;
        let (mut func_evals, mut grad_evals) = (0, 0);
        let mut iterations = 0;

        let status = 'solve: {
            for iter in 1..=opts.max_iter {
                iterations = iter;
                prev_x.assign(x);
                problem.solve_subproblem(x);

                ensure_dim(&mut h, problem.multipliers().eq.dim());
                ensure_dim(&mut g, problem.multipliers().ineq.dim());
                ensure_dim(&mut grad, x.dim());
                problem.equality_constraint(x, &mut h);
                problem.inequality_constraint(x, &mut g);
                self.violation = constraint_violation(problem.multipliers(), &h, &g);

                loss = problem.loss(x);
                problem.grad(x, &mut grad);
                func_evals += 1;
                grad_evals += 1;
                grad_norm = grad.norm_l2();

                self.diagnostics.on_iteration(&IterationRecord {
                    solver: "ALM",
                    iter,
                    loss,
                    step: rho,
                    grad_norm,
                    x_diff_norm: x.diff_norm(&prev_x),
                    f_diff: (loss - prev_loss).abs() / (prev_loss.abs() + 1.0),
                });
                prev_loss = loss;

                if !loss.is_finite() || !grad_norm.is_finite() || !self.violation.is_finite() {
                    log::warn!("[ALM] Non-finite value at outer iteration {}.", iter);
                    break 'solve Status::NumericalError;
                }

                if self.violation < eta {
                    if self.violation < opts.cons_viol_tol && grad_norm < opts.gtol {
                        break 'solve Status::Converged;
                    }
                    let m = problem.multipliers_mut();
                    m.eq.zip_mut_with(&h, |l, &hi| *l += rho * hi);
                    m.ineq.zip_mut_with(&g, |mu, &gi| *mu = (*mu + rho * gi).max(0.0));
                    eta /= rho.powf(opts.beta);
                    omega /= rho;
                    log::debug!(
                        "[ALM] iter {}: violation {:.3e} below {:.3e}; multipliers updated.",
                        iter,
                        self.violation,
                        eta * rho.powf(opts.beta)
                    );
                } else {
                    rho *= opts.penalty_growth;
                    eta = 1.0 / rho.powf(opts.alpha);
                    omega = 1.0 / rho;
                    log::debug!(
                        "[ALM] iter {}: violation {:.3e} too large; penalty raised to {:.3e}.",
                        iter,
                        self.violation,
                        rho
                    );
                }
                let m = problem.multipliers_mut();
                m.penalty = rho;
                m.gtol = omega;
            }
            Status::MaxIterReached
        };

        self.diagnostics.on_finish("ALM", status, iterations, loss);
        match status {
            Status::Converged => log::info!(
                "[ALM] Converged after {} outer iterations (violation {:.3e}, |g| {:.3e}).",
                iterations,
                self.violation,
                grad_norm
            ),
            _ => log::warn!(
                "[ALM] Stopped after {} outer iterations: {} (violation {:.3e}).",
                iterations,
                status,
                self.violation
            ),
        }
        self.report = SolveReport {
            status,
            iterations,
            loss,
            grad_norm,
            func_evals,
            grad_evals,
        };
        loss
    }
}

impl Default for AugmentedLagrangian {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for AugmentedLagrangian {
    fn report(&self) -> &SolveReport {
        &self.report
    }
}

// `‖(h, max(g, −μ/ρ))‖`: an inactive inequality with a zero multiplier counts as satisfied.
fn constraint_violation(m: &AlmMultipliers, h: &Array2<f64>, g: &Array2<f64>) -> f64 {
    let rho = m.penalty;
    let eq: f64 = h.iter().map(|v| v * v).sum();
    let ineq: f64 = g
        .iter()
        .zip(m.ineq.iter())
        .map(|(gi, mu)| {
            let v = gi.max(-mu / rho);
            v * v
        })
        .sum();
    (eq + ineq).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{GradProblem, Problem};
    use crate::solver::lbfgs::Lbfgs;
    use ndarray::array;
    use spectral::prelude::*;

    // min (x − 2)² subject to x ≤ 1.
    struct CappedParabola {
        mult: AlmMultipliers,
    }

    impl Problem for CappedParabola {
        fn loss(&mut self, x: &Array2<f64>) -> f64 {
            let g = array![[x[[0, 0]] - 1.0]];
            (x[[0, 0]] - 2.0).powi(2) + self.mult.penalty_term(&Array2::zeros((0, 0)), &g)
        }
    }

    impl GradProblem for CappedParabola {
        fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
            let g = array![[x[[0, 0]] - 1.0]];
            out[[0, 0]] = 2.0 * (x[[0, 0]] - 2.0) + self.mult.shifted_ineq(&g)[[0, 0]];
        }
    }

    impl ConstrainedProblem for CappedParabola {
        fn multipliers(&self) -> &AlmMultipliers {
            &self.mult
        }

        fn multipliers_mut(&mut self) -> &mut AlmMultipliers {
            &mut self.mult
        }

        fn inequality_constraint(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
            out[[0, 0]] = x[[0, 0]] - 1.0;
        }

        fn solve_subproblem(&mut self, x: &mut Array2<f64>) {
            let gtol = self.mult.gtol.min(1e-8);
            Lbfgs::new()
                .with_tolerances(1e-12, 1e-12, gtol)
                .with_max_iterations(500)
                .solve(self, x);
        }
    }

    #[test]
    fn test_active_inequality_finds_boundary_and_multiplier() {
        let mut p = CappedParabola {
            mult: AlmMultipliers::new((0, 0), (1, 1)),
        };
        let mut alm = AugmentedLagrangian::new();
        let mut x = array![[0.0]];
        alm.solve(&mut p, &mut x);
        assert!(alm.success(), "status {:?}", alm.status());
        assert_that!(&x[[0, 0]]).is_close_to(1.0, 1e-6);
        // Stationarity: 2(x − 2) + μ = 0.
        assert_that!(&p.mult.ineq[[0, 0]]).is_close_to(2.0, 1e-4);
        assert_that!(&alm.violation()).is_less_than(1e-6);
    }

    #[test]
    fn test_violation_ignores_slack_inequalities() {
        let mut m = AlmMultipliers::new((1, 1), (1, 2));
        m.penalty = 10.0;
        m.ineq[[0, 1]] = 1.0;
        let h = array![[0.3]];
        // g₀ = −5 with μ₀ = 0 is slack; g₁ = −5 with μ₁ = 1 counts as −0.1.
        let g = array![[-5.0, -5.0]];
        let v = constraint_violation(&m, &h, &g);
        assert_that!(&v).is_close_to((0.09_f64 + 0.01).sqrt(), 1e-12);
    }

    #[test]
    fn test_invalid_growth_is_rejected() {
        let mut p = CappedParabola {
            mult: AlmMultipliers::new((0, 0), (1, 1)),
        };
        let result = AugmentedLagrangian::new()
            .with_penalty(10.0, 1.0)
            .run(&mut p, array![[0.0]]);
        assert!(matches!(result, Err(OptimError::InvalidOption { name: "penalty_growth", .. })));
    }
}
