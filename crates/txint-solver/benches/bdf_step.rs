use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use txint_solver::bdf::{BdfIntegrator, DataStore};
use txint_solver::step_control::{StepErrorControl, TuningConstants};

fn bench_predictor(c: &mut Criterion) {
    let n = 500;
    let mut sec = StepErrorControl::new(1, 5, TuningConstants::default());
    sec.min_step = 1e-12;
    sec.max_step = 1.0;
    sec.begin_integration(1e-3);
    sec.current_order = 3;
    sec.used_order = 3;
    sec.update_coeffs();
    let data = DataStore::new(n, n, n, n);
    let mut bdf = BdfIntegrator::new(sec, data);

    c.bench_function("obtain_predictor_order3_n500", |b| {
        b.iter(|| black_box(&mut bdf).obtain_predictor().unwrap())
    });
}

criterion_group!(benches, bench_predictor);
criterion_main!(benches);
