use super::{LineSearch, StepBounds, take_min_step};
use crate::error::OptimError;
use crate::problem::LineSearchProblem;
use crate::solver::invalid;
use crate::state::{LineSearchState, Snapshot};

const XTRAPL: f64 = 1.1;
const XTRAPU: f64 = 4.0;

/// Parameters for the Moré-Thuente search.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MoreThuenteParams {
    /// Sufficient decrease parameter (default: 1e-4).
    pub c1: f64,
    /// Curvature parameter (default: 0.9).
    pub c2: f64,
    /// Relative width below which the bracket counts as collapsed (default: 1e-10).
    pub xtol: f64,
    /// Trial budget per search (default: 20).
    pub max_iter: usize,
    pub bounds: StepBounds,
}

impl Default for MoreThuenteParams {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            c2: 0.9,
            xtol: 1e-10,
            max_iter: 20,
            bounds: StepBounds::default(),
        }
    }
}

impl MoreThuenteParams {
    pub(crate) fn is_valid(&self) -> bool {
        0.0 < self.c1
            && self.c1 < self.c2
            && self.c2 < 1.0
            && self.xtol >= 0.0
            && self.max_iter > 0
            && self.bounds.is_valid()
    }
}

/// Line search for the strong Wolfe conditions
///
/// ```text
/// φ(α) ≤ φ(0) + c₁·α·φ'(0)
/// |φ'(α)| ≤ c₂·|φ'(0)|
/// ```
///
/// following Moré & Thuente, "Line search algorithms with guaranteed sufficient decrease"
/// (ACM TOMS 20, 1994). Trial steps come from safeguarded cubic and quadratic
/// interpolation inside a bracket that is guaranteed to contain an acceptable step.
#[derive(Debug, Clone, Default)]
pub struct MoreThuente {
    pub params: MoreThuenteParams,
    best: Snapshot,
    n_iter: usize,
    success: bool,
}

// The bracket endpoints with their function values and derivatives. `stx` is always the
// step with the lowest function value seen so far.
#[derive(Debug, Clone, Copy)]
struct Bracket {
    stx: f64,
    fx: f64,
    gx: f64,
    sty: f64,
    fy: f64,
    gy: f64,
    brackt: bool,
}

impl Bracket {
    // Moves to the auxiliary function ψ(α) = φ(α) − α·gtest.
    fn shifted(self, gtest: f64) -> Self {
        Self {
            fx: self.fx - self.stx * gtest,
            gx: self.gx - gtest,
            fy: self.fy - self.sty * gtest,
            gy: self.gy - gtest,
            ..self
        }
    }

    fn unshifted(self, gtest: f64) -> Self {
        Self {
            fx: self.fx + self.stx * gtest,
            gx: self.gx + gtest,
            fy: self.fy + self.sty * gtest,
            gy: self.gy + gtest,
            ..self
        }
    }
}

impl MoreThuente {
    pub fn new(params: MoreThuenteParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    // Leaves the best point of the search in `cur_*`.
    fn finish_at_best<P: LineSearchProblem>(
        &mut self,
        problem: &mut P,
        state: &mut LineSearchState,
        have_best: bool,
    ) {
        if have_best {
            state.exchange_current(&mut self.best);
        } else {
            take_min_step(problem, state, &self.params.bounds);
        }
    }
}

impl LineSearch for MoreThuente {
    fn search<P: LineSearchProblem>(&mut self, problem: &mut P, state: &mut LineSearchState) {
        let MoreThuenteParams {
            c1,
            c2,
            xtol,
            max_iter,
            bounds,
        } = self.params;
        self.success = false;

        let mut stp = bounds.clamp(state.step);
        state.step = stp;
        state.step_forward(problem);
        state.evaluate_loss(problem);
        state.evaluate_gradient(problem);
        self.n_iter = 1;
        if P::COMPOSITE {
            state.update_prev_grad_map(problem);
        }

        let finit = state.prev_loss;
        let ginit = state.initial_slope();
        if ginit >= 0.0 || !ginit.is_finite() {
            log::warn!(
                "[MTLS] Search direction is not a descent direction (φ'(0) = {:.3e}).",
                ginit
            );
            take_min_step(problem, state, &bounds);
            return;
        }
        let gtest = c1 * ginit;

        let mut bracket = Bracket {
            stx: 0.0,
            fx: finit,
            gx: ginit,
            sty: 0.0,
            fy: finit,
            gy: ginit,
            brackt: false,
        };
        let mut stage1 = true;
        let mut width = bounds.max_step - bounds.min_step;
        let mut width1 = 2.0 * width;
        let mut stmin = 0.0;
        let mut stmax = stp + XTRAPU * stp;
        let mut ceiling = f64::INFINITY;
        let mut have_best = false;

        loop {
            let f = state.cur_loss;
            let g = state.slope();

            if !f.is_finite() || !g.is_finite() {
                // Back off toward the best step; this region is never revisited.
                ceiling = ceiling.min(stp);
                stp = (bracket.stx + 0.5 * (stp - bracket.stx)).max(bounds.min_step);
                if self.n_iter >= max_iter || stp >= ceiling || ceiling - stp <= xtol * ceiling {
                    log::warn!("[MTLS] Non-finite trial values; returning the best point.");
                    self.finish_at_best(problem, state, have_best);
                    return;
                }
                stmax = stmax.min(ceiling);
                state.step = stp;
                state.step_forward(problem);
                state.evaluate_loss(problem);
                state.evaluate_gradient(problem);
                self.n_iter += 1;
                continue;
            }

            let ftest = finit + stp * gtest;
            if stage1 && f <= ftest && g >= 0.0 {
                stage1 = false;
            }

            if f <= ftest && g.abs() <= c2 * (-ginit) {
                self.success = true;
                return;
            }
            if (bracket.brackt && (stp <= stmin || stp >= stmax))
                || (bracket.brackt && stmax - stmin <= xtol * stmax)
                || (stp == bounds.max_step && f <= ftest && g <= gtest)
                || (stp == bounds.min_step && (f > ftest || g >= gtest))
            {
                log::debug!("[MTLS] No further progress possible at step {:.3e}.", stp);
                if f > bracket.fx {
                    self.finish_at_best(problem, state, have_best);
                }
                return;
            }
            if self.n_iter >= max_iter {
                log::debug!(
                    "[MTLS] Trial budget of {} exhausted; returning the best point.",
                    max_iter
                );
                if f > bracket.fx {
                    self.finish_at_best(problem, state, have_best);
                }
                return;
            }

            // Stage one uses the auxiliary function while a lower value has been found
            // without sufficient decrease.
            let use_aux = stage1 && f <= bracket.fx && f > ftest;
            let moves_stx = if use_aux {
                f - stp * gtest <= bracket.fx - bracket.stx * gtest
            } else {
                f <= bracket.fx
            };
            if use_aux {
                let mut aux = bracket.shifted(gtest);
                stp = dcstep(&mut aux, stp, f - stp * gtest, g - gtest, stmin, stmax);
                bracket = aux.unshifted(gtest);
            } else {
                stp = dcstep(&mut bracket, stp, f, g, stmin, stmax);
            }
            if moves_stx {
                state.exchange_current(&mut self.best);
                have_best = true;
            }

            if bracket.brackt {
                if (bracket.sty - bracket.stx).abs() >= 0.66 * width1 {
                    stp = bracket.stx + 0.5 * (bracket.sty - bracket.stx);
                }
                width1 = width;
                width = (bracket.sty - bracket.stx).abs();
                stmin = bracket.stx.min(bracket.sty);
                stmax = bracket.stx.max(bracket.sty);
            } else {
                stmin = stp + XTRAPL * (stp - bracket.stx);
                stmax = stp + XTRAPU * (stp - bracket.stx);
            }
            stp = bounds.clamp(stp);
            if stp >= ceiling {
                stp = bracket.stx + 0.5 * (ceiling - bracket.stx);
            }

            if bracket.brackt && (stp <= stmin || stp >= stmax || stmax - stmin <= xtol * stmax) {
                log::debug!("[MTLS] Bracket collapsed; returning the best point.");
                self.finish_at_best(problem, state, have_best);
                return;
            }

            state.step = stp;
            state.step_forward(problem);
            state.evaluate_loss(problem);
            state.evaluate_gradient(problem);
            self.n_iter += 1;
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
            Err(invalid("more_thuente", format!("parameters out of range: {:?}", self.params)))
        }
    }
}

fn max3(a: f64, b: f64, c: f64) -> f64 {
    a.max(b).max(c)
}

// One safeguarded step of the Moré-Thuente interval update. Updates the bracket with the
// trial `(stp, fp, dp)` and returns the next trial step inside `[stpmin, stpmax]`.
fn dcstep(b: &mut Bracket, stp: f64, fp: f64, dp: f64, stpmin: f64, stpmax: f64) -> f64 {
    let sgnd = dp * b.gx.signum();
    let stpf;

    if fp > b.fx {
        // Higher value: the minimum is bracketed. Cubic step if it is closer to stx,
        // otherwise the average of the cubic and quadratic steps.
        let theta = 3.0 * (b.fx - fp) / (stp - b.stx) + b.gx + dp;
        let s = max3(theta.abs(), b.gx.abs(), dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (b.gx / s) * (dp / s)).max(0.0).sqrt();
        if stp < b.stx {
            gamma = -gamma;
        }
        let p = (gamma - b.gx) + theta;
        let q = ((gamma - b.gx) + gamma) + dp;
        let r = p / q;
        let stpc = b.stx + r * (stp - b.stx);
        let stpq =
            b.stx + ((b.gx / ((b.fx - fp) / (stp - b.stx) + b.gx)) / 2.0) * (stp - b.stx);
        stpf = if (stpc - b.stx).abs() < (stpq - b.stx).abs() {
            stpc
        } else {
            stpc + (stpq - stpc) / 2.0
        };
        b.brackt = true;
    } else if sgnd < 0.0 {
        // Derivatives of opposite sign: bracketed. Take whichever of the cubic and secant
        // steps is farther from stp.
        let theta = 3.0 * (b.fx - fp) / (stp - b.stx) + b.gx + dp;
        let s = max3(theta.abs(), b.gx.abs(), dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (b.gx / s) * (dp / s)).max(0.0).sqrt();
        if stp > b.stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + b.gx;
        let r = p / q;
        let stpc = stp + r * (b.stx - stp);
        let stpq = stp + (dp / (dp - b.gx)) * (b.stx - stp);
        stpf = if (stpc - stp).abs() > (stpq - stp).abs() {
            stpc
        } else {
            stpq
        };
        b.brackt = true;
    } else if dp.abs() < b.gx.abs() {
        // Same sign, derivative magnitude decreasing.
        let theta = 3.0 * (b.fx - fp) / (stp - b.stx) + b.gx + dp;
        let s = max3(theta.abs(), b.gx.abs(), dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (b.gx / s) * (dp / s)).max(0.0).sqrt();
        if stp > b.stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = (gamma + (b.gx - dp)) + gamma;
        let r = p / q;
        let stpc = if r < 0.0 && gamma != 0.0 {
            stp + r * (b.stx - stp)
        } else if stp > b.stx {
            stpmax
        } else {
            stpmin
        };
        let stpq = stp + (dp / (dp - b.gx)) * (b.stx - stp);
        if b.brackt {
            let mut f = if (stpc - stp).abs() < (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            f = if stp > b.stx {
                f.min(stp + 0.66 * (b.sty - stp))
            } else {
                f.max(stp + 0.66 * (b.sty - stp))
            };
            stpf = f;
        } else {
            let f = if (stpc - stp).abs() > (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            stpf = f.clamp(stpmin, stpmax);
        }
    } else {
        // Same sign, derivative magnitude not decreasing.
        stpf = if b.brackt {
            let theta = 3.0 * (fp - b.fy) / (b.sty - stp) + b.gy + dp;
            let s = max3(theta.abs(), b.gy.abs(), dp.abs());
            let mut gamma = s * ((theta / s).powi(2) - (b.gy / s) * (dp / s)).max(0.0).sqrt();
            if stp > b.sty {
                gamma = -gamma;
            }
            let p = (gamma - dp) + theta;
            let q = ((gamma - dp) + gamma) + b.gy;
            let r = p / q;
            stp + r * (b.sty - stp)
        } else if stp > b.stx {
            stpmax
        } else {
            stpmin
        };
    }

    if fp > b.fx {
        b.sty = stp;
        b.fy = fp;
        b.gy = dp;
    } else {
        if sgnd < 0.0 {
            b.sty = b.stx;
            b.fy = b.fx;
            b.gy = b.gx;
        }
        b.stx = stp;
        b.fx = fp;
        b.gx = dp;
    }
    stpf
}
