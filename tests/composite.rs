use ndarray::{Array2, array};
use spectral::prelude::*;
use wolfe_optim::prox;
use wolfe_optim::{
    BarzilaiBorwein, GradProblem, GradientDescent, Problem, ProxProblem, Solver, Status,
};

/// `½‖x − c‖² + r(x)` for a pluggable regularizer `r`.
struct Denoise<R> {
    target: Array2<f64>,
    reg: R,
}

trait Regularizer {
    fn value(&self, x: &Array2<f64>) -> f64;
    fn prox(&self, step: f64, x: &Array2<f64>, out: &mut Array2<f64>);
}

struct Lasso(f64);

impl Regularizer for Lasso {
    fn value(&self, x: &Array2<f64>) -> f64 {
        self.0 * x.iter().map(|v| v.abs()).sum::<f64>()
    }

    fn prox(&self, step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
        prox::l1(step * self.0, x, out);
    }
}

struct Box01;

impl Regularizer for Box01 {
    fn value(&self, _x: &Array2<f64>) -> f64 {
        0.0
    }

    fn prox(&self, _step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
        let lower = Array2::zeros(x.dim());
        let upper = Array2::ones(x.dim());
        prox::project_box(&lower, &upper, x, out);
    }
}

struct L1Ball(f64);

impl Regularizer for L1Ball {
    fn value(&self, _x: &Array2<f64>) -> f64 {
        0.0
    }

    fn prox(&self, _step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
        prox::l1_ball(self.0, x, out);
    }
}

impl<R: Regularizer> Problem for Denoise<R> {
    fn loss(&mut self, x: &Array2<f64>) -> f64 {
        self.smooth_loss(x) + self.nonsmooth_loss(x)
    }
}

impl<R: Regularizer> GradProblem for Denoise<R> {
    fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
        out.assign(&(x - &self.target));
    }
}

impl<R: Regularizer> ProxProblem for Denoise<R> {
    fn smooth_loss(&mut self, x: &Array2<f64>) -> f64 {
        0.5 * x.iter().zip(self.target.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>()
    }

    fn nonsmooth_loss(&mut self, x: &Array2<f64>) -> f64 {
        self.reg.value(x)
    }

    fn prox(&mut self, step: f64, x: &Array2<f64>, out: &mut Array2<f64>) {
        self.reg.prox(step, x, out);
    }
}

fn assert_close(actual: &Array2<f64>, expected: &Array2<f64>, tol: f64) {
    assert_eq!(actual.dim(), expected.dim());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_that(a).is_close_to(*e, tol);
    }
}

#[test]
fn test_proximal_gradient_solves_lasso() {
    let mut p = Denoise {
        target: array![[3.0, -0.5], [1.5, 0.2]],
        reg: Lasso(1.0),
    };
    let mut solver = GradientDescent::new()
        .with_step(0.5)
        .with_tolerances(1e-10, 1e-10, 1e-10);
    let sol = solver.run_composite(&mut p, Array2::zeros((2, 2))).unwrap();
    // soft(c, μ)
    assert_close(&sol.final_point, &array![[2.0, 0.0], [0.5, 0.0]], 1e-7);
    assert_that!(&sol.final_value).is_close_to(0.5 * (1.0 + 0.25 + 1.0 + 0.04) + 2.5, 1e-6);
}

#[test]
fn test_barzilai_borwein_solves_lasso() {
    let mut p = Denoise {
        target: array![[4.0, -2.0, 0.3, -0.9]],
        reg: Lasso(0.5),
    };
    let mut solver = BarzilaiBorwein::new().with_tolerances(1e-10, 1e-10, 1e-10);
    let sol = solver.run_composite(&mut p, array![[1.0, 1.0, 1.0, 1.0]]).unwrap();
    assert_close(&sol.final_point, &array![[3.5, -1.5, 0.0, -0.4]], 1e-6);
}

#[test]
fn test_box_projection_with_unit_step() {
    let mut p = Denoise {
        target: array![[-1.0, 0.25, 2.0]],
        reg: Box01,
    };
    let mut x = array![[0.5, 0.5, 0.5]];
    let mut solver = GradientDescent::new().with_step(1.0);
    solver.solve_composite(&mut p, &mut x);
    assert_eq!(solver.status(), Status::Converged);
    assert_that(&solver.n_iter()).is_less_than_or_equal_to(2);
    assert_close(&x, &array![[0.0, 0.25, 1.0]], 1e-12);
}

#[test]
fn test_l1_ball_constraint() {
    let mut p = Denoise {
        target: array![[3.0, 2.0]],
        reg: L1Ball(2.0),
    };
    let mut x = Array2::zeros((1, 2));
    let mut solver = GradientDescent::new().with_step(1.0);
    solver.solve_composite(&mut p, &mut x);
    assert!(solver.success(), "status {:?}", solver.status());
    assert_close(&x, &array![[1.5, 0.5]], 1e-9);
    assert_that!(&x.iter().map(|v| v.abs()).sum::<f64>()).is_less_than_or_equal_to(2.0 + 1e-12);
}
