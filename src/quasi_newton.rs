//! Curvature estimates for quasi-Newton directions.
//!
//! [`CurvatureHistory`] keeps the last `m` pairs `(s, y)` and applies the implicit inverse
//! Hessian with the two-loop recursion. [`InverseHessian`] keeps the dense BFGS inverse and
//! updates it in place.

use std::collections::VecDeque;

use ndarray::{Array1, Array2};

use crate::linalg::{MatOps, ensure_dim, flat_matvec};
use crate::state::LineSearchState;

const EPS: f64 = f64::EPSILON;

/// One curvature observation `s = x₊ − x`, `y = g₊ − g`.
#[derive(Debug, Clone)]
pub struct CurvaturePair {
    pub s: Array2<f64>,
    pub y: Array2<f64>,
    /// `1 / yᵀs`.
    pub rho: f64,
    /// Scratch coefficient of the two-loop recursion.
    pub alpha: f64,
}

impl CurvaturePair {
    fn zeros(dim: (usize, usize)) -> Self {
        Self {
            s: Array2::zeros(dim),
            y: Array2::zeros(dim),
            rho: 0.0,
            alpha: 0.0,
        }
    }
}

/// Bounded FIFO of curvature pairs for L-BFGS.
///
/// Buffers of an evicted pair are reused for the next accepted one, so a full history never
/// allocates.
#[derive(Debug, Clone)]
pub struct CurvatureHistory {
    pairs: VecDeque<CurvaturePair>,
    capacity: usize,
    spare: Option<CurvaturePair>,
}

impl CurvatureHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be positive");
        Self {
            pairs: VecDeque::with_capacity(capacity),
            capacity,
            spare: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        if let Some(p) = self.pairs.pop_back() {
            self.spare = Some(p);
        }
        self.pairs.clear();
    }

    /// Pairs from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &CurvaturePair> {
        self.pairs.iter()
    }

    /// Stores `(s, y)`. Returns `false`, leaving the history untouched, when `yᵀs` or `yᵀy`
    /// is not above machine epsilon.
    pub fn push(&mut self, s: &Array2<f64>, y: &Array2<f64>) -> bool {
        let mut pair = self.take_spare(s.dim());
        pair.s.assign(s);
        pair.y.assign(y);
        self.commit(pair)
    }

    /// Stores the step just taken by a line search: `s = cur_x − prev_x` and
    /// `y = cur_grad − prev_grad`.
    pub fn push_from_state(&mut self, state: &LineSearchState) -> bool {
        let mut pair = self.take_spare(state.cur_x.dim());
        for ((s, c), p) in pair.s.iter_mut().zip(state.cur_x.iter()).zip(state.prev_x.iter()) {
            *s = c - p;
        }
        for ((y, c), p) in pair
            .y
            .iter_mut()
            .zip(state.cur_grad.iter())
            .zip(state.prev_grad.iter())
        {
            *y = c - p;
        }
        self.commit(pair)
    }

    fn take_spare(&mut self, dim: (usize, usize)) -> CurvaturePair {
        match self.spare.take() {
            Some(mut p) => {
                ensure_dim(&mut p.s, dim);
                ensure_dim(&mut p.y, dim);
                p
            }
            None => CurvaturePair::zeros(dim),
        }
    }

    fn commit(&mut self, mut pair: CurvaturePair) -> bool {
        let sy = pair.s.frob_dot(&pair.y);
        let yy = pair.y.frob_dot(&pair.y);
        if sy <= EPS || yy <= EPS || !sy.is_finite() || !yy.is_finite() {
            self.spare = Some(pair);
            return false;
        }
        pair.rho = 1.0 / sy;
        if self.pairs.len() == self.capacity {
            self.spare = self.pairs.pop_front();
        }
        self.pairs.push_back(pair);
        true
    }

    /// Initial inverse-Hessian scale `sᵀy / yᵀy` of the newest pair, `1` when empty.
    pub fn gamma(&self) -> f64 {
        self.pairs.back().map_or(1.0, |p| {
            let yy = p.y.frob_dot(&p.y);
            1.0 / (p.rho * yy)
        })
    }

    /// Two-loop recursion: `out = −H·grad` with `H₀ = h0·I`.
    pub fn two_loop(&mut self, grad: &Array2<f64>, h0: f64, out: &mut Array2<f64>) {
        ensure_dim(out, grad.dim());
        out.assign(grad);
        for p in self.pairs.iter_mut().rev() {
            p.alpha = p.rho * p.s.frob_dot(out);
            out.scaled_add(-p.alpha, &p.y);
        }
        *out *= h0;
        for p in self.pairs.iter() {
            let beta = p.rho * p.y.frob_dot(out);
            out.scaled_add(p.alpha - beta, &p.s);
        }
        out.mapv_inplace(|v| -v);
    }
}

/// Dense inverse-Hessian approximation for full BFGS, over flattened points.
#[derive(Debug, Clone)]
pub struct InverseHessian {
    h: Array2<f64>,
    s: Array1<f64>,
    y: Array1<f64>,
    hy: Array1<f64>,
    rescale: bool,
}

impl InverseHessian {
    /// `H = I` for points with `n` entries in total.
    pub fn new(n: usize) -> Self {
        Self {
            h: Array2::eye(n),
            s: Array1::zeros(n),
            y: Array1::zeros(n),
            hy: Array1::zeros(n),
            rescale: false,
        }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.h
    }

    pub fn reset(&mut self) {
        self.scale_identity(1.0);
    }

    /// `H = gamma·I`.
    pub fn scale_identity(&mut self, gamma: f64) {
        self.h.fill(0.0);
        self.h.diag_mut().fill(gamma);
    }

    /// `H ← (I − ρsyᵀ)·H·(I − ρysᵀ) + ρssᵀ`. Skipped, returning `false`, when `yᵀs ≤ ε`.
    pub fn update(&mut self, s: &Array2<f64>, y: &Array2<f64>) -> bool {
        for (dst, v) in self.s.iter_mut().zip(s.iter()) {
            *dst = *v;
        }
        for (dst, v) in self.y.iter_mut().zip(y.iter()) {
            *dst = *v;
        }
        self.apply_update()
    }

    /// Update from the step just taken by a line search.
    pub fn update_from_state(&mut self, state: &LineSearchState) -> bool {
        for ((dst, c), p) in self.s.iter_mut().zip(state.cur_x.iter()).zip(state.prev_x.iter()) {
            *dst = c - p;
        }
        for ((dst, c), p) in self
            .y
            .iter_mut()
            .zip(state.cur_grad.iter())
            .zip(state.prev_grad.iter())
        {
            *dst = c - p;
        }
        self.apply_update()
    }

    /// Makes the next accepted update start from `H = (sᵀy / yᵀy)·I`.
    pub fn scale_on_next_update(&mut self) {
        self.rescale = true;
    }

    fn apply_update(&mut self) -> bool {
        let sy = self.s.dot(&self.y);
        if sy <= EPS || !sy.is_finite() {
            return false;
        }
        if self.rescale {
            let yy = self.y.dot(&self.y);
            if yy > EPS {
                self.scale_identity(sy / yy);
            }
            self.rescale = false;
        }
        let rho = 1.0 / sy;
        ndarray::linalg::general_mat_vec_mul(1.0, &self.h, &self.y, 0.0, &mut self.hy);
        let yhy = self.y.dot(&self.hy);
        let coef = rho * rho * yhy + rho;
        let n = self.s.len();
        for i in 0..n {
            for j in 0..n {
                self.h[[i, j]] += -rho * (self.hy[i] * self.s[j] + self.s[i] * self.hy[j])
                    + coef * self.s[i] * self.s[j];
            }
        }
        true
    }

    /// `out = −H·grad`.
    pub fn direction(&self, grad: &Array2<f64>, out: &mut Array2<f64>) {
        flat_matvec(&self.h, grad, out);
        out.mapv_inplace(|v| -v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    fn spd() -> Array2<f64> {
        array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]]
    }

    fn pair_for(a: &Array2<f64>, s: [f64; 3]) -> (Array2<f64>, Array2<f64>) {
        let s = Array2::from_shape_vec((1, 3), s.to_vec()).unwrap();
        let y = a.dot(&s.t()).reversed_axes();
        (s, y)
    }

    #[test]
    fn test_two_loop_matches_full_bfgs() {
        let a = spd();
        let steps = [[1.0, 0.0, 0.5], [-0.3, 2.0, 0.1], [0.2, -0.4, 1.5], [0.7, 0.7, -0.7]];
        let mut history = CurvatureHistory::new(16);
        let mut dense = InverseHessian::new(3);
        for s in steps {
            let (s, y) = pair_for(&a, s);
            assert!(history.push(&s, &y));
            assert!(dense.update(&s, &y));
        }
        let g = array![[0.3, -1.2, 2.5]];
        let mut d_two_loop = Array2::zeros((0, 0));
        let mut d_dense = Array2::zeros((0, 0));
        history.two_loop(&g, 1.0, &mut d_two_loop);
        dense.direction(&g, &mut d_dense);
        for (u, v) in d_two_loop.iter().zip(d_dense.iter()) {
            assert_that(u).is_close_to(*v, 1e-10);
        }
    }

    #[test]
    fn test_three_updates_recover_inverse_of_quadratic() {
        // n independent pairs from a quadratic pin down H = A⁻¹ exactly.
        // The steps must be A-conjugate, as exact line searches would produce.
        let a = spd();
        let mut conj: Vec<Array2<f64>> = Vec::new();
        for k in 0..3 {
            let mut s = Array2::zeros((1, 3));
            s[[0, k]] = 1.0;
            for prev in conj.iter() {
                let a_prev = a.dot(&prev.t()).reversed_axes();
                let coef = s.frob_dot(&a_prev) / prev.frob_dot(&a_prev);
                s.scaled_add(-coef, prev);
            }
            conj.push(s);
        }
        let mut dense = InverseHessian::new(3);
        for s in conj.iter() {
            let y = a.dot(&s.t()).reversed_axes();
            assert!(dense.update(s, &y));
        }
        let prod = dense.matrix().dot(&a);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_that!(&prod[[i, j]]).is_close_to(expected, 1e-10);
            }
        }
    }

    #[test]
    fn test_history_evicts_oldest_pair() {
        let mut history = CurvatureHistory::new(2);
        for k in 1..=3 {
            let s = array![[k as f64, 0.0]];
            let y = array![[1.0, 0.0]];
            assert!(history.push(&s, &y));
        }
        assert_eq!(history.len(), 2);
        let firsts: Vec<f64> = history.iter().map(|p| p.s[[0, 0]]).collect();
        assert_eq!(firsts, vec![2.0, 3.0]);
    }

    #[test]
    fn test_rejected_pair_leaves_full_history_intact() {
        let mut history = CurvatureHistory::new(1);
        assert!(history.push(&array![[1.0]], &array![[2.0]]));
        assert!(!history.push(&array![[1.0]], &array![[-2.0]]));
        assert!(!history.push(&array![[1.0]], &array![[0.0]]));
        assert_eq!(history.len(), 1);
        assert_that!(&history.iter().next().unwrap().rho).is_close_to(0.5, 1e-15);
        assert_that!(&history.gamma()).is_close_to(0.5, 1e-15);
    }

    #[test]
    fn test_first_update_scaling() {
        // s = (1, 0), y = (4, 0): H₀ = I/4, and the update keeps H·y = s.
        let mut dense = InverseHessian::new(2);
        dense.scale_on_next_update();
        assert!(dense.update(&array![[1.0, 0.0]], &array![[4.0, 0.0]]));
        assert_that!(&dense.matrix()[[0, 0]]).is_close_to(0.25, 1e-15);
        assert_that!(&dense.matrix()[[1, 1]]).is_close_to(0.25, 1e-15);
        // Only the first update is rescaled.
        assert!(dense.update(&array![[0.0, 1.0]], &array![[0.0, 2.0]]));
        assert_that!(&dense.matrix()[[1, 1]]).is_close_to(0.5, 1e-15);
    }

    #[test]
    fn test_dense_direction_on_matrix_shaped_point() {
        let mut dense = InverseHessian::new(4);
        dense.scale_identity(0.5);
        dense.h[[0, 3]] = 1.0;
        let mut d = Array2::zeros((0, 0));
        dense.direction(&array![[2.0, 4.0], [6.0, 8.0]], &mut d);
        // Row-major flattening: entry (0, 0) couples to entry (1, 1).
        assert_eq!(d, array![[-9.0, -2.0], [-3.0, -4.0]]);
    }

    #[test]
    fn test_dense_update_rejects_negative_curvature() {
        let mut dense = InverseHessian::new(2);
        assert!(!dense.update(&array![[1.0, 0.0]], &array![[-1.0, 0.0]]));
        assert_eq!(dense.matrix(), &Array2::<f64>::eye(2));
    }
}
