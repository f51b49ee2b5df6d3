//! Benchmarks for the line-search solvers on the extended Rosenbrock function.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use wolfe_optim::{
    Armijo, BarzilaiBorwein, Bfgs, GradProblem, HessProblem, Lbfgs, NewtonCg, NewtonLdlt, Problem,
};

struct ExtendedRosenbrock;

impl Problem for ExtendedRosenbrock {
    fn loss(&mut self, x: &Array2<f64>) -> f64 {
        let v = x.as_slice().unwrap();
        v.chunks(2)
            .map(|w| (1.0 - w[0]).powi(2) + 100.0 * (w[1] - w[0] * w[0]).powi(2))
            .sum()
    }
}

impl GradProblem for ExtendedRosenbrock {
    fn grad(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
        let v = x.as_slice().unwrap();
        let g = out.as_slice_mut().unwrap();
        for (w, o) in v.chunks(2).zip(g.chunks_mut(2)) {
            let t = w[1] - w[0] * w[0];
            o[0] = -2.0 * (1.0 - w[0]) - 400.0 * w[0] * t;
            o[1] = 200.0 * t;
        }
    }
}

impl HessProblem for ExtendedRosenbrock {
    fn hess(&mut self, x: &Array2<f64>, out: &mut Array2<f64>) {
        out.fill(0.0);
        let v = x.as_slice().unwrap();
        for (k, w) in v.chunks(2).enumerate() {
            let (i, j) = (2 * k, 2 * k + 1);
            out[[i, i]] = 2.0 - 400.0 * (w[1] - 3.0 * w[0] * w[0]);
            out[[i, j]] = -400.0 * w[0];
            out[[j, i]] = -400.0 * w[0];
            out[[j, j]] = 200.0;
        }
    }
}

fn start(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((1, n), |(_, j)| if j % 2 == 0 { -1.2 } else { 1.0 })
}

fn bench_quasi_newton(c: &mut Criterion) {
    let mut group = c.benchmark_group("quasi_newton");

    for n in [2, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::new("bfgs", n), n, |b, &n| {
            b.iter(|| {
                let mut x = start(n);
                Bfgs::new()
                    .with_max_iterations(2000)
                    .solve(&mut ExtendedRosenbrock, black_box(&mut x))
            });
        });
        group.bench_with_input(BenchmarkId::new("lbfgs", n), n, |b, &n| {
            b.iter(|| {
                let mut x = start(n);
                Lbfgs::new()
                    .with_max_iterations(2000)
                    .solve(&mut ExtendedRosenbrock, black_box(&mut x))
            });
        });
    }

    group.finish();
}

fn bench_newton(c: &mut Criterion) {
    let mut group = c.benchmark_group("newton");

    for n in [2, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::new("cg", n), n, |b, &n| {
            b.iter(|| {
                let mut x = start(n);
                NewtonCg::new().solve(&mut ExtendedRosenbrock, black_box(&mut x))
            });
        });
        group.bench_with_input(BenchmarkId::new("ldlt", n), n, |b, &n| {
            b.iter(|| {
                let mut x = start(n);
                NewtonLdlt::new().solve(&mut ExtendedRosenbrock, black_box(&mut x))
            });
        });
    }

    group.finish();
}

fn bench_first_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_order");

    for n in [2, 10, 50].iter() {
        group.bench_with_input(BenchmarkId::new("barzilai_borwein", n), n, |b, &n| {
            b.iter(|| {
                let mut x = start(n);
                BarzilaiBorwein::new()
                    .with_max_iterations(2000)
                    .solve(&mut ExtendedRosenbrock, black_box(&mut x))
            });
        });
        group.bench_with_input(BenchmarkId::new("barzilai_borwein_gll", n), n, |b, &n| {
            b.iter(|| {
                let mut x = start(n);
                BarzilaiBorwein::new()
                    .with_line_search(Armijo::nonmonotone(10))
                    .with_max_iterations(2000)
                    .solve(&mut ExtendedRosenbrock, black_box(&mut x))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_quasi_newton, bench_newton, bench_first_order);
criterion_main!(benches);
