use criterion::{Criterion, criterion_group, criterion_main};
use faer::rand::{Rng, SeedableRng, rngs::SmallRng};
use grid_geometry::{
    Anchor, Envelope, GridExtent, GridGeometry, Matrix, NonLinearTransform, Transform,
    TransformError,
};
use std::{hint::black_box, sync::Arc};

/// A non-linear step that keeps a chain from collapsing into a single
/// matrix, so the multi-step evaluation path actually runs.
#[derive(Debug)]
struct SineWarp;

impl NonLinearTransform for SineWarp {
    fn source_dim(&self) -> usize {
        3
    }

    fn target_dim(&self) -> usize {
        3
    }

    fn apply_into(&self, pt: &[f64], buf: &mut [f64]) -> Result<(), TransformError> {
        buf[0] = pt[0] + (pt[1] / 10.0).sin();
        buf[1] = pt[1];
        buf[2] = pt[2];
        Ok(())
    }

    fn derivative(&self, pt: &[f64]) -> Result<Matrix, TransformError> {
        let mut jac = Matrix::identity(3);
        jac[(0, 1)] = (pt[1] / 10.0).cos() / 10.0;
        Ok(jac)
    }
}

fn coords(n_pts: usize, ndim: usize) -> Vec<Vec<f64>> {
    let mut rng = SmallRng::seed_from_u64(1991);
    let mut pts = Vec::with_capacity(n_pts);
    for _ in 0..n_pts {
        let mut pt = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            pt.push(rng.random::<f64>() * 100.0);
        }
        pts.push(pt);
    }
    pts
}

struct Bencher<'c> {
    name: String,
    criterion: &'c mut Criterion,
}

impl<'c> Bencher<'c> {
    fn new<S: Into<String>>(name: S, criterion: &'c mut Criterion) -> Self {
        Self {
            name: name.into(),
            criterion,
        }
    }

    fn eval(&mut self, t: &Transform) {
        let coords = coords(1000, t.source_dim());
        let mut out = vec![f64::NAN; t.target_dim()];
        self.criterion
            .bench_function(&format!("{}[transform]", self.name), |b| {
                b.iter(|| {
                    for pt in coords.iter() {
                        black_box(t.transform_into(pt, &mut out)).unwrap();
                    }
                })
            });

        let mid = &coords[coords.len() / 2];
        self.criterion
            .bench_function(&format!("{}[derivative]", self.name), |b| {
                b.iter(|| black_box(t.derivative(mid)))
            });
    }
}

fn translation(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(Translation), c);
    let t = Transform::translation(&[2.0, 3.0, 4.0]).unwrap();
    bencher.eval(&t);
}

fn scale(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(Scale), c);
    let t = Transform::scale(&[2.0, 3.0, 4.0]).unwrap();
    bencher.eval(&t);
}

fn affine_2d(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(Affine2D), c);
    let t = Transform::affine_2d([2.0, 0.5, 1.0, -0.5, 2.0, 3.0]).unwrap();
    bencher.eval(&t);
}

fn linear(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(Linear), c);
    #[rustfmt::skip]
    let matrix = Matrix::try_new(vec![
        1.0, 2.0, 0.0, 4.0,
        0.0, 1.0, 1.0, -2.0,
        2.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ], 4).unwrap();
    let t = Transform::linear(matrix).unwrap();
    bencher.eval(&t);
}

fn concatenated(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(Concatenated), c);
    let t = Transform::translation(&[1.0, 2.0, 3.0])
        .unwrap()
        .concatenate(&Transform::non_linear(Arc::new(SineWarp)).unwrap())
        .unwrap()
        .concatenate(&Transform::scale(&[2.0, 2.0, 2.0]).unwrap())
        .unwrap();
    bencher.eval(&t);
}

fn concatenation(c: &mut Criterion) {
    let a = Transform::affine_2d([2.0, 0.5, 1.0, -0.5, 2.0, 3.0]).unwrap();
    let b = Transform::affine_2d([1.0, 0.0, -4.0, 0.0, 1.0, 7.0]).unwrap();
    c.bench_function("Transform[concatenate]", |bench| {
        bench.iter(|| black_box(a.concatenate(&b)))
    });
    c.bench_function("Transform[inverse]", |bench| {
        bench.iter(|| black_box(a.inverse()))
    });
}

fn base_grid() -> GridGeometry {
    let extent = GridExtent::of_size(&[4096, 4096]).unwrap();
    let to_crs = Transform::affine_2d([0.05, 0.0, -100.0, 0.0, -0.05, 100.0]).unwrap();
    GridGeometry::new(extent, Anchor::CellCorner, to_crs, None).unwrap()
}

fn envelope(c: &mut Criterion) {
    let t = Transform::affine_2d([2.0, 0.5, 1.0, -0.5, 2.0, 3.0]).unwrap();
    let env = Envelope::new(&[-40.0, -40.0], &[40.0, 40.0]).unwrap();
    c.bench_function("Envelope[transformed]", |bench| {
        bench.iter(|| black_box(env.transformed(&t)))
    });
}

fn derivation(c: &mut Criterion) {
    let base = base_grid();
    let area = Envelope::new(&[-40.0, -40.0], &[40.0, 40.0]).unwrap();
    c.bench_function("GridDerivation[subgrid]", |bench| {
        bench.iter(|| {
            black_box(
                base.derive()
                    .subgrid(&area, None)
                    .unwrap()
                    .build()
                    .unwrap(),
            )
        })
    });
    c.bench_function("GridDerivation[subsample]", |bench| {
        bench.iter(|| {
            black_box(
                base.derive()
                    .subgrid(&area, Some(&[0.5, 0.5]))
                    .unwrap()
                    .build()
                    .unwrap(),
            )
        })
    });
    c.bench_function("GridDerivation[slice]", |bench| {
        bench.iter(|| {
            black_box(
                base.derive()
                    .slice(&[0.0, f64::NAN], None)
                    .unwrap()
                    .build()
                    .unwrap(),
            )
        })
    });
}

criterion_group!(
    atoms,
    translation,
    scale,
    affine_2d,
    linear,
    concatenated,
    concatenation,
    envelope,
    derivation
);
criterion_main!(atoms);
