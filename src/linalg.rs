//! Dense linear-algebra helpers on top of `ndarray`.
//!
//! Points and gradients are `Array2<f64>` and are treated as flat vectors in row-major order
//! wherever a Hessian or an inner product is involved.

use ndarray::{Array1, Array2};

/// Vector-space operations on `n × k` points.
pub trait MatOps {
    /// Frobenius inner product `Σ aᵢⱼ·bᵢⱼ`.
    fn frob_dot(&self, other: &Self) -> f64;
    /// Frobenius norm.
    fn norm_l2(&self) -> f64;
    fn norm_inf(&self) -> f64;
    /// Entrywise `p`-norm, `p ≥ 1`.
    fn norm_lp(&self, p: f64) -> f64;
    /// `‖self − other‖_F` without a temporary.
    fn diff_norm(&self, other: &Self) -> f64;
}

impl MatOps for Array2<f64> {
    fn frob_dot(&self, other: &Self) -> f64 {
        debug_assert_eq!(self.dim(), other.dim());
        self.iter().zip(other.iter()).map(|(a, b)| a * b).sum()
    }

    fn norm_l2(&self) -> f64 {
        self.iter().map(|a| a * a).sum::<f64>().sqrt()
    }

    fn norm_inf(&self) -> f64 {
        self.iter().fold(0.0, |m, a| m.max(a.abs()))
    }

    fn norm_lp(&self, p: f64) -> f64 {
        debug_assert!(p >= 1.0);
        self.iter()
            .map(|a| a.abs().powf(p))
            .sum::<f64>()
            .powf(1.0 / p)
    }

    fn diff_norm(&self, other: &Self) -> f64 {
        debug_assert_eq!(self.dim(), other.dim());
        self.iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

/// Reshapes `a` to `dim` only when it differs, so steady-state reuse never reallocates.
#[inline]
pub fn ensure_dim(a: &mut Array2<f64>, dim: (usize, usize)) {
    if a.dim() != dim {
        *a = Array2::zeros(dim);
    }
}

/// `out = H·v`, with `v` and `out` read as flat row-major vectors of length `H.nrows()`.
pub fn flat_matvec(h: &Array2<f64>, v: &Array2<f64>, out: &mut Array2<f64>) {
    debug_assert_eq!(h.nrows(), v.len());
    ensure_dim(out, v.dim());
    for (o, row) in out.iter_mut().zip(h.rows()) {
        *o = row.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
    }
}

/// Writes a flat vector back into a point of the same length.
pub fn unflatten_into(flat: &Array1<f64>, out: &mut Array2<f64>) {
    debug_assert_eq!(flat.len(), out.len());
    for (o, v) in out.iter_mut().zip(flat.iter()) {
        *o = *v;
    }
}

/// Why conjugate gradient stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgStatus {
    /// Relative residual fell below the tolerance.
    Converged,
    /// The iteration budget ran out first.
    MaxIter,
    /// A search direction with `pᵀAp ≤ 0` was met. The iterate holds the progress made
    /// before it.
    NegativeCurvature,
}

#[derive(Debug, Clone, Copy)]
pub struct CgOutcome {
    pub status: CgStatus,
    pub iterations: usize,
}

/// Solves `A·x = b` for a symmetric operator given as `apply(p, out) = A·p`.
///
/// Starts from `x = 0` and stops when `‖r‖ ≤ tol·‖b‖`.
pub fn conjugate_gradient<F>(
    mut apply: F,
    b: &Array1<f64>,
    x: &mut Array1<f64>,
    tol: f64,
    max_iter: usize,
) -> CgOutcome
where
    F: FnMut(&Array1<f64>, &mut Array1<f64>),
{
    let n = b.len();
    if x.len() != n {
        *x = Array1::zeros(n);
    } else {
        x.fill(0.0);
    }
    let b_norm = b.dot(b).sqrt();
    if b_norm == 0.0 {
        return CgOutcome {
            status: CgStatus::Converged,
            iterations: 0,
        };
    }

    let mut r = b.clone();
    let mut p = b.clone();
    let mut ap = Array1::<f64>::zeros(n);
    let mut rr = r.dot(&r);

    for it in 0..max_iter {
        apply(&p, &mut ap);
        let pap = p.dot(&ap);
        if pap <= 0.0 || !pap.is_finite() {
            return CgOutcome {
                status: CgStatus::NegativeCurvature,
                iterations: it,
            };
        }
        let alpha = rr / pap;
        x.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &ap);
        let rr_new = r.dot(&r);
        if rr_new.sqrt() <= tol * b_norm {
            return CgOutcome {
                status: CgStatus::Converged,
                iterations: it + 1,
            };
        }
        let beta = rr_new / rr;
        p.zip_mut_with(&r, |pi, &ri| *pi = ri + beta * *pi);
        rr = rr_new;
    }

    CgOutcome {
        status: CgStatus::MaxIter,
        iterations: max_iter,
    }
}

/// Symmetric `P·A·Pᵀ = L·D·Lᵀ` with diagonal pivoting.
///
/// Works for indefinite matrices as long as every pivot stays away from zero; a zero pivot
/// means the matrix is treated as singular.
#[derive(Debug, Clone)]
pub struct Ldlt {
    // Unit lower factor below the diagonal, D on the diagonal.
    lu: Array2<f64>,
    perm: Vec<usize>,
}

impl Ldlt {
    /// Factors a symmetric matrix. Returns `None` for a non-square, non-finite or
    /// numerically singular input.
    pub fn factor(a: &Array2<f64>) -> Option<Self> {
        let n = a.nrows();
        if a.ncols() != n {
            return None;
        }
        let mut m = a.to_owned();
        let mut perm: Vec<usize> = (0..n).collect();
        let scale = (0..n).fold(0.0_f64, |s, i| s.max(a[[i, i]].abs())).max(1.0);
        let tiny = f64::EPSILON * n.max(1) as f64 * scale;

        for k in 0..n {
            let mut p = k;
            for i in (k + 1)..n {
                if m[[i, i]].abs() > m[[p, p]].abs() {
                    p = i;
                }
            }
            if p != k {
                for j in 0..n {
                    m.swap([k, j], [p, j]);
                }
                for i in 0..n {
                    m.swap([i, k], [i, p]);
                }
                perm.swap(k, p);
            }

            let d = m[[k, k]];
            if !d.is_finite() || d.abs() <= tiny {
                return None;
            }
            for i in (k + 1)..n {
                m[[i, k]] /= d;
            }
            for i in (k + 1)..n {
                let lik = m[[i, k]];
                for j in (k + 1)..n {
                    m[[i, j]] -= lik * d * m[[j, k]];
                }
            }
        }
        Some(Self { lu: m, perm })
    }

    pub fn dim(&self) -> usize {
        self.perm.len()
    }

    /// Solves `A·x = b`.
    pub fn solve(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.dim();
        debug_assert_eq!(b.len(), n);
        let mut z: Array1<f64> = self.perm.iter().map(|&i| b[i]).collect();
        // L·y = P·b
        for i in 0..n {
            let mut sum = z[i];
            for k in 0..i {
                sum -= self.lu[[i, k]] * z[k];
            }
            z[i] = sum;
        }
        for i in 0..n {
            z[i] /= self.lu[[i, i]];
        }
        // Lᵀ·w = D⁻¹·y
        for i in (0..n).rev() {
            let mut sum = z[i];
            for k in (i + 1)..n {
                sum -= self.lu[[k, i]] * z[k];
            }
            z[i] = sum;
        }
        let mut x = Array1::<f64>::zeros(n);
        for (i, &pi) in self.perm.iter().enumerate() {
            x[pi] = z[i];
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_norms_and_dot() {
        let a = array![[3.0, -4.0], [0.0, 0.0]];
        let b = array![[1.0, 1.0], [2.0, 2.0]];
        assert_that!(&a.norm_l2()).is_close_to(5.0, 1e-12);
        assert_that!(&a.norm_inf()).is_close_to(4.0, 1e-12);
        assert_that!(&a.norm_lp(1.0)).is_close_to(7.0, 1e-12);
        assert_that!(&a.frob_dot(&b)).is_close_to(-1.0, 1e-12);
        assert_that!(&a.diff_norm(&a)).is_close_to(0.0, 1e-15);
    }

    #[test]
    fn test_ldlt_solves_indefinite_system() {
        let a = array![[1.0, 2.0, 0.0], [2.0, -3.0, 1.0], [0.0, 1.0, 4.0]];
        let x_true = array![1.0, -2.0, 0.5];
        let b = a.dot(&x_true);
        let ldlt = Ldlt::factor(&a).unwrap();
        let x = ldlt.solve(&b);
        for i in 0..3 {
            assert_that!(&x[i]).is_close_to(x_true[i], 1e-10);
        }
    }

    #[test]
    fn test_ldlt_rejects_singular() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(Ldlt::factor(&a).is_none());
    }

    #[test]
    fn test_cg_converges_on_spd() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let b = array![1.0, 2.0];
        let mut x = Array1::zeros(2);
        let out = conjugate_gradient(|p, ap| ap.assign(&a.dot(p)), &b, &mut x, 1e-12, 10);
        assert_eq!(out.status, CgStatus::Converged);
        assert_that(&out.iterations).is_less_than_or_equal_to(2);
        assert_that!(&x[0]).is_close_to(1.0 / 11.0, 1e-10);
        assert_that!(&x[1]).is_close_to(7.0 / 11.0, 1e-10);
    }

    #[test]
    fn test_cg_reports_negative_curvature() {
        let a = array![[-1.0, 0.0], [0.0, 2.0]];
        let b = array![1.0, 0.0];
        let mut x = Array1::zeros(2);
        let out = conjugate_gradient(|p, ap| ap.assign(&a.dot(p)), &b, &mut x, 1e-12, 10);
        assert_eq!(out.status, CgStatus::NegativeCurvature);
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn test_flat_matvec_uses_row_major_order() {
        let h = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 2.0, 0.0, 0.0],
            [0.0, 0.0, 3.0, 0.0],
            [0.0, 0.0, 0.0, 4.0]
        ];
        let v = array![[1.0, 1.0], [1.0, 1.0]];
        let mut out = Array2::zeros((0, 0));
        flat_matvec(&h, &v, &mut out);
        assert_eq!(out, array![[1.0, 2.0], [3.0, 4.0]]);
    }
}
