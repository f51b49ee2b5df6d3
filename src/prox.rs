//! Proximal operators for common non-smooth terms.
//!
//! Every operator writes into a caller-owned buffer, which is only reshaped the first time it
//! is used with a new shape. A composite problem typically forwards its `prox` to one of
//! these, scaling `step` by its regularization weight.

use ndarray::Array2;

use crate::linalg::{MatOps, ensure_dim};

/// Soft thresholding, the prox of `step·‖x‖₁`.
pub fn l1(step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
    debug_assert!(step >= 0.0);
    ensure_dim(out, x.dim());
    out.zip_mut_with(x, |o, &v| *o = v.signum() * (v.abs() - step).max(0.0));
}

/// Block soft thresholding, the prox of `step·‖x‖_F`.
pub fn l2(step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
    debug_assert!(step >= 0.0);
    ensure_dim(out, x.dim());
    let nrm = x.norm_l2();
    if nrm > step {
        let scale = 1.0 - step / nrm;
        out.zip_mut_with(x, |o, &v| *o = scale * v);
    } else {
        out.fill(0.0);
    }
}

/// Euclidean projection onto `{y : ‖y‖₁ ≤ radius}`.
///
/// Feasible inputs are returned unchanged. Otherwise the threshold is found by sorting the
/// magnitudes, using `out` as scratch space.
pub fn l1_ball(radius: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
    debug_assert!(radius >= 0.0);
    ensure_dim(out, x.dim());
    if x.norm_lp(1.0) <= radius {
        out.assign(x);
        return;
    }
    out.zip_mut_with(x, |o, &v| *o = v.abs());
    let theta = match out.as_slice_mut() {
        Some(u) => l1_threshold(u, radius),
        None => {
            let mut u: Vec<f64> = out.iter().copied().collect();
            l1_threshold(&mut u, radius)
        }
    };
    out.zip_mut_with(x, |o, &v| *o = v.signum() * (v.abs() - theta).max(0.0));
}

// Sorts `u` descending and returns the soft-threshold level that lands on the ball.
fn l1_threshold(u: &mut [f64], radius: f64) -> f64 {
    u.sort_unstable_by(|a, b| b.total_cmp(a));
    let mut cumsum = 0.0;
    let mut theta = 0.0;
    for (j, &uj) in u.iter().enumerate() {
        cumsum += uj;
        let t = (cumsum - radius) / (j + 1) as f64;
        if uj - t > 0.0 {
            theta = t;
        } else {
            break;
        }
    }
    theta.max(0.0)
}

/// The prox of `step·‖x‖_∞`, through the Moreau decomposition
/// `x − step·P(x / step)` with `P` the projection onto the unit L1 ball.
pub fn linf(step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
    debug_assert!(step >= 0.0);
    ensure_dim(out, x.dim());
    if step == 0.0 {
        out.assign(x);
        return;
    }
    let scaled = x.mapv(|v| v / step);
    l1_ball(1.0, &scaled, out);
    out.zip_mut_with(x, |o, &v| *o = v - step * *o);
}

/// Coordinate-wise clamping into `[lower, upper]`, the prox of the box indicator.
pub fn project_box(
    lower: &Array2<f64>,
    upper: &Array2<f64>,
    x: &Array2<f64>,
    out: &mut Array2<f64>,
) {
    debug_assert_eq!(lower.dim(), x.dim());
    debug_assert_eq!(upper.dim(), x.dim());
    ensure_dim(out, x.dim());
    for (((o, &v), &lo), &hi) in out
        .iter_mut()
        .zip(x.iter())
        .zip(lower.iter())
        .zip(upper.iter())
    {
        *o = v.max(lo).min(hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>, tol: f64) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_that(x).is_close_to(*y, tol);
        }
    }

    #[test]
    fn test_l1_soft_thresholds() {
        let x = array![[3.0, -0.5], [-2.0, 1.0]];
        let mut out = Array2::zeros((0, 0));
        l1(1.0, &x, &mut out);
        assert_close(&out, &array![[2.0, 0.0], [-1.0, 0.0]], 1e-15);
    }

    #[test]
    fn test_shrinkage_composes_additively() {
        let x = array![[3.0, -0.5], [-2.0, 1.5]];
        let (mut once, mut twice, mut joint) = (
            Array2::zeros((0, 0)),
            Array2::zeros((0, 0)),
            Array2::zeros((0, 0)),
        );
        l1(0.4, &x, &mut once);
        l1(0.7, &once, &mut twice);
        l1(1.1, &x, &mut joint);
        assert_close(&twice, &joint, 1e-12);

        l2(0.4, &x, &mut once);
        l2(0.7, &once, &mut twice);
        l2(1.1, &x, &mut joint);
        assert_close(&twice, &joint, 1e-12);
    }

    #[test]
    fn test_l2_zeroes_small_inputs() {
        let x = array![[0.3, 0.4]];
        let mut out = Array2::zeros((0, 0));
        l2(0.5, &x, &mut out);
        assert_close(&out, &array![[0.0, 0.0]], 0.0);
        l2(0.25, &x, &mut out);
        assert_close(&out, &array![[0.15, 0.2]], 1e-15);
    }

    #[test]
    fn test_l1_ball_is_feasible_and_idempotent() {
        let inputs = [
            array![[3.0, -1.0], [0.5, 2.0]],
            array![[0.1, -0.1], [0.2, 0.05]],
            array![[-7.0, 0.0], [0.0, 0.0]],
            array![[1.0, 1.0], [1.0, 1.0]],
        ];
        for x in inputs.iter() {
            let mut y = Array2::zeros((0, 0));
            let mut z = Array2::zeros((0, 0));
            l1_ball(1.0, x, &mut y);
            assert_that!(&y.norm_lp(1.0)).is_less_than_or_equal_to(1.0 + 1e-12);
            l1_ball(1.0, &y, &mut z);
            assert_close(&z, &y, 1e-12);
        }
        // Already feasible: unchanged.
        let x = array![[0.1, -0.1], [0.2, 0.05]];
        let mut y = Array2::zeros((0, 0));
        l1_ball(1.0, &x, &mut y);
        assert_eq!(y, x);
    }

    #[test]
    fn test_l1_ball_known_projection() {
        let x = array![[3.0, 1.0]];
        let mut y = Array2::zeros((0, 0));
        l1_ball(1.0, &x, &mut y);
        assert_close(&y, &array![[1.0, 0.0]], 1e-15);

        let x = array![[1.0, 1.0]];
        l1_ball(1.0, &x, &mut y);
        assert_close(&y, &array![[0.5, 0.5]], 1e-15);
    }

    #[test]
    fn test_linf_clips_largest_entries() {
        // prox of ‖·‖∞ with step 1 on (3, 1): the top entry moves down by 1.
        let x = array![[3.0, 1.0]];
        let mut y = Array2::zeros((0, 0));
        linf(1.0, &x, &mut y);
        assert_close(&y, &array![[2.0, 1.0]], 1e-12);
        // Inside the dual ball everything collapses to zero.
        let x = array![[0.3, -0.2]];
        linf(1.0, &x, &mut y);
        assert_close(&y, &array![[0.0, 0.0]], 1e-12);
    }

    #[test]
    fn test_project_box_is_idempotent() {
        let lower = array![[0.0, -1.0]];
        let upper = array![[1.0, 1.0]];
        let x = array![[2.0, -3.0]];
        let mut y = Array2::zeros((0, 0));
        let mut z = Array2::zeros((0, 0));
        project_box(&lower, &upper, &x, &mut y);
        assert_close(&y, &array![[1.0, -1.0]], 0.0);
        project_box(&lower, &upper, &y, &mut z);
        assert_eq!(z, y);
    }
}
