//! Sliding-window loss history with best-iterate tracking.

use std::collections::VecDeque;

use ndarray::Array2;

/// Keeps the maximum loss over the last `window` iterations and the best iterate seen.
///
/// The window is a deque of `(iteration, loss)` whose losses decrease from front to back, so
/// the front is always the window maximum. Stale fronts are dropped as iterations advance.
#[derive(Debug, Clone)]
pub struct Recorder {
    window: usize,
    recent: VecDeque<(usize, f64)>,
    keep_point: bool,
    best_iter: usize,
    best_loss: f64,
    best_x: Option<Array2<f64>>,
}

impl Recorder {
    pub const DEFAULT_WINDOW: usize = 8;

    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
            keep_point: true,
            best_iter: 0,
            best_loss: f64::INFINITY,
            best_x: None,
        }
    }

    /// A recorder that tracks losses only and never copies points.
    pub fn losses_only(window: usize) -> Self {
        Self {
            keep_point: false,
            ..Self::new(window)
        }
    }

    pub fn clear(&mut self) {
        self.recent.clear();
        self.best_iter = 0;
        self.best_loss = f64::INFINITY;
        self.best_x = None;
    }

    pub fn record(&mut self, iter: usize, loss: f64, x: &Array2<f64>) {
        self.record_loss(iter, loss);
        if self.keep_point && self.best_iter == iter && self.best_loss == loss {
            match self.best_x.as_mut() {
                Some(b) if b.dim() == x.dim() => b.assign(x),
                _ => self.best_x = Some(x.clone()),
            }
        }
    }

    pub fn record_loss(&mut self, iter: usize, loss: f64) {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_iter = iter;
        }
        while let Some(&(first, _)) = self.recent.front() {
            if first + self.window <= iter {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        while let Some(&(_, last)) = self.recent.back() {
            if last < loss {
                self.recent.pop_back();
            } else {
                break;
            }
        }
        self.recent.push_back((iter, loss));
    }

    /// Largest loss recorded within the window, or `-inf` before the first record.
    pub fn max_recent_loss(&self) -> f64 {
        self.recent.front().map_or(f64::NEG_INFINITY, |&(_, f)| f)
    }

    pub fn best_iter(&self) -> usize {
        self.best_iter
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_x(&self) -> Option<&Array2<f64>> {
        self.best_x.as_ref()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}
