use super::{LineSearch, StepBounds, take_min_step};
use crate::error::OptimError;
use crate::problem::LineSearchProblem;
use crate::recorder::Recorder;
use crate::solver::invalid;
use crate::state::LineSearchState;

/// Parameters for the backtracking Armijo search.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmijoParams {
    /// Sufficient decrease parameter (default: 1e-4).
    pub c: f64,
    /// Backtracking factor (default: 0.5).
    pub decay: f64,
    /// Trial budget per search (default: 30).
    pub max_iter: usize,
    /// Number of recent accepted losses the reference is taken over. `1` is the classic
    /// monotone rule; larger windows give the GLL non-monotone variant (default: 1).
    pub window: usize,
    pub bounds: StepBounds,
}

impl Default for ArmijoParams {
    fn default() -> Self {
        Self {
            c: 1e-4,
            decay: 0.5,
            max_iter: 30,
            window: 1,
            bounds: StepBounds::default(),
        }
    }
}

impl ArmijoParams {
    pub(crate) fn is_valid(&self) -> bool {
        self.c > 0.0
            && self.c < 1.0
            && self.decay > 0.0
            && self.decay < 1.0
            && self.max_iter > 0
            && self.bounds.is_valid()
    }
}

/// Backtracking search for `f(x + αd) ≤ R + c·α·gᵀd`.
///
/// `R` is `f(x)`, or the largest of the last `window` accepted losses when non-monotone.
/// Composite problems measure the slope with the gradient mapping at the trial step.
#[derive(Debug, Clone)]
pub struct Armijo {
    pub params: ArmijoParams,
    history: Recorder,
    searches: usize,
    n_iter: usize,
    success: bool,
}

impl Armijo {
    pub fn new(params: ArmijoParams) -> Self {
        Self {
            history: Recorder::losses_only(params.window),
            params,
            searches: 0,
            n_iter: 0,
            success: true,
        }
    }

    /// The non-monotone variant over the last `window` accepted losses.
    pub fn nonmonotone(window: usize) -> Self {
        Self::new(ArmijoParams {
            window,
            ..ArmijoParams::default()
        })
    }

    fn reference(&self, state: &LineSearchState) -> f64 {
        if self.params.window > 1 {
            self.history.max_recent_loss().max(state.prev_loss)
        } else {
            state.prev_loss
        }
    }
}

impl Default for Armijo {
    fn default() -> Self {
        Self::new(ArmijoParams::default())
    }
}

impl LineSearch for Armijo {
    fn init(&mut self, state: &LineSearchState) {
        self.history = Recorder::losses_only(self.params.window);
        self.searches = 0;
        self.history.record_loss(0, state.prev_loss);
    }

    fn search<P: LineSearchProblem>(&mut self, problem: &mut P, state: &mut LineSearchState) {
        let ArmijoParams {
            c,
            decay,
            max_iter,
            bounds,
            ..
        } = self.params;
        let reference = self.reference(state);
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
            if self.n_iter == 1 && slope >= 0.0 {
                log::warn!("[Armijo] Non-descent direction (gᵀd = {:.3e}).", slope);
            }
            if state.cur_loss <= reference + c * state.step * slope {
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
                "[Armijo] No sufficient decrease after {} trials; taking the minimum step.",
                self.n_iter
            );
            take_min_step(problem, state, &bounds);
        }

        self.searches += 1;
        self.history.record_loss(self.searches, state.cur_loss);
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
            Err(invalid("armijo", format!("parameters out of range: {:?}", self.params)))
        }
    }
}
