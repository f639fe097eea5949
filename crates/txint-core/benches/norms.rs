use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use txint_core::{LocalReduce, StateVector, ToleranceSpec};

fn bench_wrms(c: &mut Criterion) {
    let tol = ToleranceSpec::new(1e-3, 1e-9).unwrap();
    let x = StateVector::from_vec((0..2000).map(|i| (i as f64).sin()).collect());
    let w = tol.error_weights(&x);

    c.bench_function("wrms_norm_2000", |b| {
        b.iter(|| black_box(&x).wrms_norm(black_box(&w), &LocalReduce).unwrap())
    });
}

criterion_group!(benches, bench_wrms);
criterion_main!(benches);
