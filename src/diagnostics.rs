//! Per-iteration reporting.
//!
//! Solvers push one [`IterationRecord`] per accepted step into an injected [`Diagnostics`]
//! sink. The default sink drops everything; [`LogSink`] forwards to the `log` facade.

use crate::solver::Status;

/// What a solver knows after an accepted step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    pub solver: &'static str,
    pub iter: usize,
    pub loss: f64,
    pub step: f64,
    /// Gradient norm, or gradient-mapping norm for composite problems.
    pub grad_norm: f64,
    pub x_diff_norm: f64,
    /// Relative loss change `|Δf| / (|f_prev| + 1)`.
    pub f_diff: f64,
}

pub trait Diagnostics {
    fn on_iteration(&mut self, record: &IterationRecord);

    fn on_finish(
        &mut self,
        _solver: &'static str,
        _status: Status,
        _iterations: usize,
        _loss: f64,
    ) {
    }
}

/// Discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl Diagnostics for NoopSink {
    fn on_iteration(&mut self, _record: &IterationRecord) {}
}

/// Logs every `every`-th iteration at info level and the rest at trace level.
#[derive(Debug, Clone, Copy)]
pub struct LogSink {
    pub every: usize,
}

impl Default for LogSink {
    fn default() -> Self {
        Self { every: 5 }
    }
}

impl Diagnostics for LogSink {
    fn on_iteration(&mut self, r: &IterationRecord) {
        let level = if self.every > 0 && r.iter % self.every == 0 {
            log::Level::Info
        } else {
            log::Level::Trace
        };
        log::log!(
            level,
            "[{}] iter {:>5} | loss {:.6e} | step {:.3e} | |g| {:.3e} | |dx| {:.3e} | df {:.3e}",
            r.solver,
            r.iter,
            r.loss,
            r.step,
            r.grad_norm,
            r.x_diff_norm,
            r.f_diff
        );
    }

    fn on_finish(&mut self, solver: &'static str, status: Status, iterations: usize, loss: f64) {
        log::info!(
            "[{}] {} after {} iterations (loss {:.6e}).",
            solver,
            status,
            iterations,
            loss
        );
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for Box<D> {
    fn on_iteration(&mut self, record: &IterationRecord) {
        (**self).on_iteration(record);
    }

    fn on_finish(&mut self, solver: &'static str, status: Status, iterations: usize, loss: f64) {
        (**self).on_finish(solver, status, iterations, loss);
    }
}
