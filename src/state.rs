//! The iterate pair a line search moves between.
//!
//! `prev_*` holds the last accepted iterate, `cur_*` the trial (or, after a search, the newly
//! accepted) iterate. Transitions never copy whole buffers when a swap will do: `flush` promotes
//! `cur_*` to `prev_*` by exchanging the underlying arrays.

use ndarray::Array2;

use crate::linalg::{MatOps, ensure_dim};
use crate::problem::LineSearchProblem;

/// Working state shared by a solver and its line search for one solve.
#[derive(Debug, Clone)]
pub struct LineSearchState {
    /// Step length tried along `direction`. Always positive.
    pub step: f64,
    pub prev_loss: f64,
    pub cur_loss: f64,
    pub prev_smooth_loss: f64,
    pub cur_smooth_loss: f64,
    pub prev_nonsmooth_loss: f64,
    pub cur_nonsmooth_loss: f64,
    pub direction: Array2<f64>,
    pub prev_x: Array2<f64>,
    pub cur_x: Array2<f64>,
    pub prev_grad: Array2<f64>,
    pub cur_grad: Array2<f64>,
    /// Gradient mappings, only maintained for composite problems.
    pub prev_grad_map: Array2<f64>,
    pub cur_grad_map: Array2<f64>,
    composite: bool,
    scratch: Array2<f64>,
    func_evals: usize,
    grad_evals: usize,
}

/// An iterate parked outside the state, exchanged in and out with
/// [`LineSearchState::exchange_current`].
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub step: f64,
    pub loss: f64,
    pub smooth_loss: f64,
    pub nonsmooth_loss: f64,
    pub x: Array2<f64>,
    pub grad: Array2<f64>,
    pub grad_map: Array2<f64>,
}

impl LineSearchState {
    /// Creates a state whose current iterate is `x0`. Nothing is evaluated yet.
    pub fn new(x0: &Array2<f64>, composite: bool) -> Self {
        let dim = x0.dim();
        let (prev_grad_map, cur_grad_map) = if composite {
            (Array2::zeros(dim), Array2::zeros(dim))
        } else {
            (Array2::zeros((0, 0)), Array2::zeros((0, 0)))
        };
        Self {
            step: 1.0,
            prev_loss: f64::INFINITY,
            cur_loss: f64::INFINITY,
            prev_smooth_loss: f64::INFINITY,
            cur_smooth_loss: f64::INFINITY,
            prev_nonsmooth_loss: 0.0,
            cur_nonsmooth_loss: 0.0,
            direction: Array2::zeros(dim),
            prev_x: x0.clone(),
            cur_x: x0.clone(),
            prev_grad: Array2::zeros(dim),
            cur_grad: Array2::zeros(dim),
            prev_grad_map,
            cur_grad_map,
            composite,
            scratch: Array2::zeros(dim),
            func_evals: 0,
            grad_evals: 0,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.composite
    }

    pub fn func_evals(&self) -> usize {
        self.func_evals
    }

    pub fn grad_evals(&self) -> usize {
        self.grad_evals
    }

    /// `cur_x = prev_x + step·direction`, passed through the prox for composite problems.
    pub fn step_forward<P: LineSearchProblem>(&mut self, problem: &mut P) {
        debug_assert!(self.step > 0.0, "step must be positive, got {}", self.step);
        ensure_dim(&mut self.cur_x, self.prev_x.dim());
        self.cur_x.assign(&self.prev_x);
        self.cur_x.scaled_add(self.step, &self.direction);
        if P::COMPOSITE {
            ensure_dim(&mut self.scratch, self.cur_x.dim());
            problem.prox(self.step, &self.cur_x, &mut self.scratch);
            std::mem::swap(&mut self.cur_x, &mut self.scratch);
        }
    }

    /// Evaluates the loss at `cur_x`.
    pub fn evaluate_loss<P: LineSearchProblem>(&mut self, problem: &mut P) {
        let (smooth, nonsmooth) = problem.loss_parts(&self.cur_x);
        self.cur_smooth_loss = smooth;
        self.cur_nonsmooth_loss = nonsmooth;
        self.cur_loss = smooth + nonsmooth;
        self.func_evals += 1;
    }

    /// Evaluates the gradient at `cur_x`, and the gradient mapping for composite problems.
    pub fn evaluate_gradient<P: LineSearchProblem>(&mut self, problem: &mut P) {
        ensure_dim(&mut self.cur_grad, self.cur_x.dim());
        problem.grad(&self.cur_x, &mut self.cur_grad);
        self.grad_evals += 1;
        if P::COMPOSITE {
            self.update_cur_grad_map(problem);
        }
    }

    /// `ĝ = (x − prox(x − step·g, step)) / step` at the current iterate.
    pub fn update_cur_grad_map<P: LineSearchProblem>(&mut self, problem: &mut P) {
        grad_map(
            problem,
            self.step,
            &self.cur_x,
            &self.cur_grad,
            &mut self.scratch,
            &mut self.cur_grad_map,
        );
    }

    /// Recomputes the gradient mapping at the accepted iterate for the current `step`.
    pub fn update_prev_grad_map<P: LineSearchProblem>(&mut self, problem: &mut P) {
        grad_map(
            problem,
            self.step,
            &self.prev_x,
            &self.prev_grad,
            &mut self.scratch,
            &mut self.prev_grad_map,
        );
    }

    /// Promotes the current iterate to the accepted one. Buffers are swapped, not copied.
    pub fn flush(&mut self) {
        std::mem::swap(&mut self.prev_x, &mut self.cur_x);
        std::mem::swap(&mut self.prev_grad, &mut self.cur_grad);
        std::mem::swap(&mut self.prev_grad_map, &mut self.cur_grad_map);
        self.prev_loss = self.cur_loss;
        self.prev_smooth_loss = self.cur_smooth_loss;
        self.prev_nonsmooth_loss = self.cur_nonsmooth_loss;
    }

    /// Makes the accepted iterate in `prev_*` current again. Undoes a `flush`, or discards a
    /// rejected trial.
    pub fn rewind(&mut self) {
        std::mem::swap(&mut self.prev_x, &mut self.cur_x);
        std::mem::swap(&mut self.prev_grad, &mut self.cur_grad);
        std::mem::swap(&mut self.prev_grad_map, &mut self.cur_grad_map);
        self.cur_loss = self.prev_loss;
        self.cur_smooth_loss = self.prev_smooth_loss;
        self.cur_nonsmooth_loss = self.prev_nonsmooth_loss;
    }

    /// Swaps the current iterate with `snap`.
    pub fn exchange_current(&mut self, snap: &mut Snapshot) {
        std::mem::swap(&mut self.cur_x, &mut snap.x);
        std::mem::swap(&mut self.cur_grad, &mut snap.grad);
        std::mem::swap(&mut self.cur_grad_map, &mut snap.grad_map);
        std::mem::swap(&mut self.cur_loss, &mut snap.loss);
        std::mem::swap(&mut self.cur_smooth_loss, &mut snap.smooth_loss);
        std::mem::swap(&mut self.cur_nonsmooth_loss, &mut snap.nonsmooth_loss);
        std::mem::swap(&mut self.step, &mut snap.step);
    }

    /// Slope of the loss along the step at the accepted iterate.
    ///
    /// Smooth: `dᵀ∇f(prev_x)`. Composite: `(cur_x − prev_x)ᵀĝ(prev_x) / step`, which needs
    /// `cur_x` and `prev_grad_map` for the current `step`.
    pub fn initial_slope(&self) -> f64 {
        if self.composite {
            self.displacement_dot(&self.prev_grad_map)
        } else {
            self.direction.frob_dot(&self.prev_grad)
        }
    }

    /// Slope of the loss along the step at the trial iterate.
    pub fn slope(&self) -> f64 {
        if self.composite {
            self.displacement_dot(&self.cur_grad_map)
        } else {
            self.direction.frob_dot(&self.cur_grad)
        }
    }

    fn displacement_dot(&self, g: &Array2<f64>) -> f64 {
        let s: f64 = self
            .cur_x
            .iter()
            .zip(self.prev_x.iter())
            .zip(g.iter())
            .map(|((c, p), gi)| (c - p) * gi)
            .sum();
        s / self.step
    }

    /// `‖cur_x − prev_x‖_F`.
    pub fn point_diff_norm(&self) -> f64 {
        self.cur_x.diff_norm(&self.prev_x)
    }

    /// Norm of the gradient, or of the gradient mapping for composite problems.
    pub fn grad_norm(&self) -> f64 {
        if self.composite {
            self.cur_grad_map.norm_l2()
        } else {
            self.cur_grad.norm_l2()
        }
    }

    /// `|f_cur − f_prev| / (|f_prev| + 1)`.
    pub fn relative_loss_diff(&self) -> f64 {
        (self.cur_loss - self.prev_loss).abs() / (self.prev_loss.abs() + 1.0)
    }

    /// `direction = −cur_grad`.
    pub fn set_direction_neg_grad(&mut self) {
        ensure_dim(&mut self.direction, self.cur_grad.dim());
        self.direction.zip_mut_with(&self.cur_grad, |d, &g| *d = -g);
    }
}

fn grad_map<P: LineSearchProblem>(
    problem: &mut P,
    step: f64,
    x: &Array2<f64>,
    g: &Array2<f64>,
    scratch: &mut Array2<f64>,
    out: &mut Array2<f64>,
) {
    debug_assert!(step > 0.0);
    ensure_dim(scratch, x.dim());
    ensure_dim(out, x.dim());
    scratch.assign(x);
    scratch.scaled_add(-step, g);
    problem.prox(step, scratch, out);
    out.zip_mut_with(x, |o, &xi| *o = (xi - *o) / step);
}
