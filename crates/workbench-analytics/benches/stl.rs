//! Benchmarks for the STL decomposition.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use workbench_analytics::{Loess, Stl, StlParams};

fn generate_test_data(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 100.0 + (i as f64 * 0.26).sin() * 10.0 + i as f64 * 0.01)
        .collect()
}

fn benchmark_loess(c: &mut Criterion) {
    let mut group = c.benchmark_group("LOESS");

    for size in [500, 5000].iter() {
        let data = generate_test_data(*size);

        group.bench_with_input(BenchmarkId::new("jump_1", size), &data, |b, data| {
            let loess = Loess::new(49, 1);
            b.iter(|| loess.smooth(black_box(data), None))
        });

        group.bench_with_input(BenchmarkId::new("jump_default", size), &data, |b, data| {
            let loess = Loess::with_default_jump(49);
            b.iter(|| loess.smooth(black_box(data), None))
        });
    }

    group.finish();
}

fn benchmark_stl(c: &mut Criterion) {
    let mut group = c.benchmark_group("STL");

    for size in [500, 2000].iter() {
        let data = generate_test_data(*size);

        group.bench_with_input(BenchmarkId::new("robust", size), &data, |b, data| {
            let stl = Stl::new(24);
            b.iter(|| stl.fit(black_box(data)))
        });

        group.bench_with_input(BenchmarkId::new("plain", size), &data, |b, data| {
            let stl = Stl::with_params(StlParams::new(24).robust(false));
            b.iter(|| stl.fit(black_box(data)))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_loess, benchmark_stl);
criterion_main!(benches);
