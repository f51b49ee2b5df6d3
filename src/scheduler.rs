//! Initial step for the next line search.

use crate::state::LineSearchState;

pub trait StepScheduler {
    /// Adjusts `state.step` after the step from `prev_*` to `cur_*` was accepted.
    fn update(&mut self, iter: usize, state: &mut LineSearchState);
}

/// Leaves the step as the line search returned it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantStep;

impl StepScheduler for ConstantStep {
    fn update(&mut self, _iter: usize, _state: &mut LineSearchState) {}
}

/// Geometric decay `step ← decay·step`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialDecay {
    pub decay: f64,
}

impl Default for ExponentialDecay {
    fn default() -> Self {
        Self { decay: 0.9 }
    }
}

impl StepScheduler for ExponentialDecay {
    fn update(&mut self, _iter: usize, state: &mut LineSearchState) {
        state.step *= self.decay;
    }
}

/// Barzilai-Borwein steps, alternating `|sᵀy|/yᵀy` (odd iterations) and `sᵀs/|sᵀy|` (even).
#[derive(Debug, Clone, Copy, Default)]
pub struct BarzilaiBorweinStep;

impl BarzilaiBorweinStep {
    /// The BB step for the pair in `state`, or `None` when `sᵀy` vanishes.
    pub fn step(iter: usize, state: &LineSearchState) -> Option<f64> {
        let (mut ss, mut sy, mut yy) = (0.0, 0.0, 0.0);
        for (((c, p), gc), gp) in state
            .cur_x
            .iter()
            .zip(state.prev_x.iter())
            .zip(state.cur_grad.iter())
            .zip(state.prev_grad.iter())
        {
            let s = c - p;
            let y = gc - gp;
            ss += s * s;
            sy += s * y;
            yy += y * y;
        }
        let sy = sy.abs();
        if sy == 0.0 || !sy.is_finite() {
            return None;
        }
        let step = if iter % 2 == 1 { sy / yy } else { ss / sy };
        step.is_finite().then_some(step)
    }
}

impl StepScheduler for BarzilaiBorweinStep {
    fn update(&mut self, iter: usize, state: &mut LineSearchState) {
        if let Some(step) = Self::step(iter, state) {
            state.step = step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_bb_steps_recover_inverse_curvature_on_scalar_quadratic() {
        // f = 2x²: y = 4s, so both BB formulas give 1/4.
        let mut state = LineSearchState::new(&array![[1.0]], false);
        state.prev_x = array![[2.0]];
        state.cur_grad = array![[4.0]];
        state.prev_grad = array![[8.0]];
        let mut bb = BarzilaiBorweinStep;
        bb.update(1, &mut state);
        assert_that!(&state.step).is_close_to(0.25, 1e-15);
        state.step = 1.0;
        bb.update(2, &mut state);
        assert_that!(&state.step).is_close_to(0.25, 1e-15);
    }

    #[test]
    fn test_bb_keeps_step_without_curvature() {
        let mut state = LineSearchState::new(&array![[1.0]], false);
        state.step = 0.3;
        BarzilaiBorweinStep.update(1, &mut state);
        assert_that!(&state.step).is_close_to(0.3, 0.0);
    }

    #[test]
    fn test_exponential_decay() {
        let mut state = LineSearchState::new(&array![[1.0]], false);
        let mut sched = ExponentialDecay::default();
        for k in 1..=3 {
            sched.update(k, &mut state);
        }
        assert_that!(&state.step).is_close_to(0.729, 1e-12);
    }
}
