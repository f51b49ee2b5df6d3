//! Direction builders for first-order methods.
//!
//! After each accepted step a solver asks its accelerator for the next `direction`. The plain
//! rule is `−g`; the others rescale the gradient with running moment estimates, or (Nesterov)
//! extrapolate the iterate before taking the gradient.

use ndarray::Array2;

use crate::linalg::ensure_dim;
use crate::problem::LineSearchProblem;
use crate::state::LineSearchState;

const EPS: f64 = f64::EPSILON;

pub trait Accelerator {
    /// Sizes accumulators for a new solve.
    fn init(&mut self, _state: &LineSearchState) {}

    /// Sets `state.direction` from the iterate in `cur_*`. `iter` counts accepted steps from 1.
    fn update<P: LineSearchProblem>(
        &mut self,
        iter: usize,
        problem: &mut P,
        state: &mut LineSearchState,
    );
}

/// `d = −g`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainGradient;

impl Accelerator for PlainGradient {
    fn update<P: LineSearchProblem>(
        &mut self,
        _iter: usize,
        _problem: &mut P,
        state: &mut LineSearchState,
    ) {
        state.set_direction_neg_grad();
    }
}

/// Nesterov momentum: the iterate is pushed to `x + (k−1)/(k+2)·(x − x_prev)` and the
/// gradient is taken there.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nesterov;

impl Accelerator for Nesterov {
    fn update<P: LineSearchProblem>(
        &mut self,
        iter: usize,
        problem: &mut P,
        state: &mut LineSearchState,
    ) {
        let k = iter as f64;
        let momentum = (k - 1.0) / (k + 2.0);
        if momentum > 0.0 {
            let LineSearchState { cur_x, prev_x, .. } = state;
            cur_x.zip_mut_with(prev_x, |c, &p| *c += momentum * (*c - p));
            state.evaluate_loss(problem);
            state.evaluate_gradient(problem);
        }
        state.set_direction_neg_grad();
    }
}

/// AdaGrad: `G += g²`, `d = −g / √(G + ε)`.
#[derive(Debug, Clone, Default)]
pub struct AdaGrad {
    sum_sq: Array2<f64>,
}

impl Accelerator for AdaGrad {
    fn init(&mut self, state: &LineSearchState) {
        self.sum_sq = Array2::zeros(state.cur_x.dim());
    }

    fn update<P: LineSearchProblem>(
        &mut self,
        _iter: usize,
        _problem: &mut P,
        state: &mut LineSearchState,
    ) {
        ensure_dim(&mut self.sum_sq, state.cur_grad.dim());
        ensure_dim(&mut state.direction, state.cur_grad.dim());
        for ((d, s), &g) in state
            .direction
            .iter_mut()
            .zip(self.sum_sq.iter_mut())
            .zip(state.cur_grad.iter())
        {
            *s += g * g;
            *d = -g / (*s + EPS).sqrt();
        }
    }
}

/// RMSProp: `M = ρM + (1 − ρ)g²`, `d = −g / √(M + ε)`.
#[derive(Debug, Clone)]
pub struct RmsProp {
    /// Decay of the squared-gradient average (default: 0.9).
    pub rho: f64,
    mean_sq: Array2<f64>,
}

impl RmsProp {
    pub fn new(rho: f64) -> Self {
        Self {
            rho,
            mean_sq: Array2::zeros((0, 0)),
        }
    }
}

impl Default for RmsProp {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl Accelerator for RmsProp {
    fn init(&mut self, state: &LineSearchState) {
        self.mean_sq = Array2::zeros(state.cur_x.dim());
    }

    fn update<P: LineSearchProblem>(
        &mut self,
        _iter: usize,
        _problem: &mut P,
        state: &mut LineSearchState,
    ) {
        let rho = self.rho;
        ensure_dim(&mut self.mean_sq, state.cur_grad.dim());
        ensure_dim(&mut state.direction, state.cur_grad.dim());
        for ((d, m), &g) in state
            .direction
            .iter_mut()
            .zip(self.mean_sq.iter_mut())
            .zip(state.cur_grad.iter())
        {
            *m = rho * *m + (1.0 - rho) * g * g;
            *d = -g / (*m + EPS).sqrt();
        }
    }
}

/// AdaDelta: RMSProp on the gradient, scaled by a running average of squared steps.
#[derive(Debug, Clone)]
pub struct AdaDelta {
    /// Decay of both running averages (default: 0.9).
    pub rho: f64,
    mean_sq_grad: Array2<f64>,
    mean_sq_step: Array2<f64>,
}

impl AdaDelta {
    pub fn new(rho: f64) -> Self {
        Self {
            rho,
            mean_sq_grad: Array2::zeros((0, 0)),
            mean_sq_step: Array2::zeros((0, 0)),
        }
    }
}

impl Default for AdaDelta {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl Accelerator for AdaDelta {
    fn init(&mut self, state: &LineSearchState) {
        self.mean_sq_grad = Array2::zeros(state.cur_x.dim());
        self.mean_sq_step = Array2::zeros(state.cur_x.dim());
    }

    fn update<P: LineSearchProblem>(
        &mut self,
        _iter: usize,
        _problem: &mut P,
        state: &mut LineSearchState,
    ) {
        let rho = self.rho;
        let dim = state.cur_grad.dim();
        ensure_dim(&mut self.mean_sq_grad, dim);
        ensure_dim(&mut self.mean_sq_step, dim);
        ensure_dim(&mut state.direction, dim);
        let LineSearchState {
            direction,
            cur_grad,
            cur_x,
            prev_x,
            ..
        } = state;
        for ((((d, m), u), &g), (&c, &p)) in direction
            .iter_mut()
            .zip(self.mean_sq_grad.iter_mut())
            .zip(self.mean_sq_step.iter_mut())
            .zip(cur_grad.iter())
            .zip(cur_x.iter().zip(prev_x.iter()))
        {
            let v = c - p;
            *m = rho * *m + (1.0 - rho) * g * g;
            *u = rho * *u + (1.0 - rho) * v * v;
            *d = -((*u + EPS).sqrt() / (*m + EPS).sqrt()) * g;
        }
    }
}

/// Adam with bias-corrected first and second moments.
#[derive(Debug, Clone)]
pub struct Adam {
    /// First-moment decay (default: 0.9).
    pub rho1: f64,
    /// Second-moment decay (default: 0.999).
    pub rho2: f64,
    mean: Array2<f64>,
    mean_sq: Array2<f64>,
}

impl Adam {
    pub fn new(rho1: f64, rho2: f64) -> Self {
        Self {
            rho1,
            rho2,
            mean: Array2::zeros((0, 0)),
            mean_sq: Array2::zeros((0, 0)),
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999)
    }
}

impl Accelerator for Adam {
    fn init(&mut self, state: &LineSearchState) {
        self.mean = Array2::zeros(state.cur_x.dim());
        self.mean_sq = Array2::zeros(state.cur_x.dim());
    }

    fn update<P: LineSearchProblem>(
        &mut self,
        iter: usize,
        _problem: &mut P,
        state: &mut LineSearchState,
    ) {
        let (rho1, rho2) = (self.rho1, self.rho2);
        let k = iter.max(1) as i32;
        let bias1 = 1.0 - rho1.powi(k);
        let bias2 = 1.0 - rho2.powi(k);
        let dim = state.cur_grad.dim();
        ensure_dim(&mut self.mean, dim);
        ensure_dim(&mut self.mean_sq, dim);
        ensure_dim(&mut state.direction, dim);
        for (((d, s), m), &g) in state
            .direction
            .iter_mut()
            .zip(self.mean.iter_mut())
            .zip(self.mean_sq.iter_mut())
            .zip(state.cur_grad.iter())
        {
            *s = rho1 * *s + (1.0 - rho1) * g;
            *m = rho2 * *m + (1.0 - rho2) * g * g;
            *d = -(*s / bias1) / ((*m / bias2).sqrt() + EPS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_search::test_problems::WeightedQuadratic;
    use crate::problem::Smooth;
    use ndarray::array;
    use spectral::prelude::*;

    fn state_at(x: Array2<f64>, problem: &mut Smooth<'_, WeightedQuadratic>) -> LineSearchState {
        let mut state = LineSearchState::new(&x, false);
        state.evaluate_loss(problem);
        state.evaluate_gradient(problem);
        state
    }

    #[test]
    fn test_adagrad_normalizes_first_step() {
        let mut p = WeightedQuadratic(vec![1.0, 1.0]);
        let mut problem = Smooth(&mut p);
        let mut state = state_at(array![[3.0, -0.5]], &mut problem);
        let mut acc = AdaGrad::default();
        acc.init(&state);
        acc.update(1, &mut problem, &mut state);
        assert_that!(&state.direction[[0, 0]]).is_close_to(-1.0, 1e-12);
        assert_that!(&state.direction[[0, 1]]).is_close_to(1.0, 1e-12);
    }

    #[test]
    fn test_adam_first_step_is_sign_of_gradient() {
        let mut p = WeightedQuadratic(vec![1.0, 1.0]);
        let mut problem = Smooth(&mut p);
        let mut state = state_at(array![[2.0, -4.0]], &mut problem);
        let mut acc = Adam::default();
        acc.init(&state);
        acc.update(1, &mut problem, &mut state);
        assert_that!(&state.direction[[0, 0]]).is_close_to(-1.0, 1e-9);
        assert_that!(&state.direction[[0, 1]]).is_close_to(1.0, 1e-9);
    }

    #[test]
    fn test_rmsprop_first_step_scale() {
        let mut p = WeightedQuadratic(vec![1.0]);
        let mut problem = Smooth(&mut p);
        let mut state = state_at(array![[1.0]], &mut problem);
        let mut acc = RmsProp::default();
        acc.init(&state);
        acc.update(1, &mut problem, &mut state);
        // g = 2, M = 0.1·4, d = −2/√0.4.
        assert_that!(&state.direction[[0, 0]]).is_close_to(-2.0 / 0.4_f64.sqrt(), 1e-9);
    }

    #[test]
    fn test_adadelta_uses_step_history() {
        let mut p = WeightedQuadratic(vec![1.0]);
        let mut problem = Smooth(&mut p);
        let mut state = state_at(array![[1.0]], &mut problem);
        state.prev_x = array![[3.0]];
        let mut acc = AdaDelta::default();
        acc.init(&state);
        acc.update(1, &mut problem, &mut state);
        // v = −2: U = 0.4, M = 0.4, so d = −g.
        assert_that!(&state.direction[[0, 0]]).is_close_to(-2.0, 1e-9);
    }

    #[test]
    fn test_nesterov_extrapolates_and_reevaluates() {
        let mut p = WeightedQuadratic(vec![1.0]);
        let mut problem = Smooth(&mut p);
        let mut state = state_at(array![[1.0]], &mut problem);
        state.prev_x = array![[2.0]];
        let mut acc = Nesterov;
        // k = 1: no momentum yet.
        acc.update(1, &mut problem, &mut state);
        assert_that!(&state.cur_x[[0, 0]]).is_close_to(1.0, 0.0);
        // k = 4: momentum 1/2, x = 1 + 0.5·(1 − 2) = 0.5.
        acc.update(4, &mut problem, &mut state);
        assert_that!(&state.cur_x[[0, 0]]).is_close_to(0.5, 1e-15);
        assert_that!(&state.cur_loss).is_close_to(0.25, 1e-15);
        assert_that!(&state.direction[[0, 0]]).is_close_to(-1.0, 1e-15);
    }
}
