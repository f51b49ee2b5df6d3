use super::{LineSearch, StepBounds, take_min_step};
use crate::error::OptimError;
use crate::problem::LineSearchProblem;
use crate::solver::invalid;
use crate::state::LineSearchState;

/// Parameters for the Zhang-Hager non-monotone search.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZhangHagerParams {
    /// Sufficient decrease parameter ρ (default: 1e-3).
    pub rho: f64,
    /// Averaging weight γ of the reference value (default: 0.85).
    pub gamma: f64,
    /// Backtracking factor (default: 0.5).
    pub decay: f64,
    /// Trial budget per search (default: 30).
    pub max_iter: usize,
    pub bounds: StepBounds,
}

impl Default for ZhangHagerParams {
    fn default() -> Self {
        Self {
            rho: 1e-3,
            gamma: 0.85,
            decay: 0.5,
            max_iter: 30,
            bounds: StepBounds::default(),
        }
    }
}

impl ZhangHagerParams {
    pub(crate) fn is_valid(&self) -> bool {
        self.rho > 0.0
            && self.rho < 1.0
            && (0.0..=1.0).contains(&self.gamma)
            && self.decay > 0.0
            && self.decay < 1.0
            && self.max_iter > 0
            && self.bounds.is_valid()
    }
}

/// Non-monotone backtracking against a running average of past losses.
///
/// Accepts the first `α` with `f(x + αd) ≤ C + ρ·α·gᵀd`. After each accepted step the
/// reference moves to `C ← (γ·Q_prev·C + f_new) / Q` with `Q = γ·Q_prev + 1`, so `γ = 0`
/// recovers the monotone Armijo rule.
#[derive(Debug, Clone)]
pub struct ZhangHager {
    pub params: ZhangHagerParams,
    c: f64,
    q: f64,
    n_iter: usize,
    success: bool,
}

impl ZhangHager {
    pub fn new(params: ZhangHagerParams) -> Self {
        Self {
            params,
            c: f64::INFINITY,
            q: 1.0,
            n_iter: 0,
            success: true,
        }
    }

    /// Current reference value `C`.
    pub fn reference(&self) -> f64 {
        self.c
    }
}

impl Default for ZhangHager {
    fn default() -> Self {
        Self::new(ZhangHagerParams::default())
    }
}

impl LineSearch for ZhangHager {
    fn init(&mut self, state: &LineSearchState) {
        self.c = state.prev_loss;
        self.q = 1.0;
    }

    fn search<P: LineSearchProblem>(&mut self, problem: &mut P, state: &mut LineSearchState) {
        let ZhangHagerParams {
            rho,
            gamma,
            decay,
            max_iter,
            bounds,
        } = self.params;
        if !self.c.is_finite() {
            self.c = state.prev_loss;
        }
        if !P::COMPOSITE && state.initial_slope() > 0.0 {
            log::warn!("[ZHLS] Ascent direction supplied; searching along its reverse.");
            state.direction.mapv_inplace(|d| -d);
        }
        state.step = bounds.clamp(state.step);
        self.n_iter = 0;
        self.success = false;

        let mut clamped = false;
        while self.n_iter < max_iter {
            state.step_forward(problem);
            state.evaluate_loss(problem);
            self.n_iter += 1;
            if P::COMPOSITE {
                state.update_prev_grad_map(problem);
            }
            let slope = state.initial_slope();
            if state.cur_loss <= self.c + rho * state.step * slope {
                self.success = true;
                break;
            }
            if state.step <= bounds.min_step {
                clamped = true;
                break;
            }
            state.step = (state.step * decay).max(bounds.min_step);
        }

        if self.success || clamped {
            state.evaluate_gradient(problem);
        } else {
            log::debug!(
                "[ZHLS] No acceptable step after {} trials; taking the minimum step.",
                self.n_iter
            );
            take_min_step(problem, state, &bounds);
        }

        if state.cur_loss.is_finite() {
            let q_prev = self.q;
            self.q = gamma * q_prev + 1.0;
            self.c = (gamma * q_prev * self.c + state.cur_loss) / self.q;
        }
    }

    fn success(&self) -> bool {
        self.success
    }

    fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn bounds(&self) -> StepBounds {
        self.params.bounds
    }

    fn validate(&self) -> Result<(), OptimError> {
        if self.params.is_valid() {
            Ok(())
        } else {
            Err(invalid("zhang_hager", format!("parameters out of range: {:?}", self.params)))
        }
    }
}
