//! Criterion benchmarks for the bounded weighted KDE.
//!
//! Covers model construction (Silverman bandwidth + kernel normalization), pointwise
//! evaluation on a fixed grid and the analytic integral, at several sample sizes.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::prelude::*;
use rand_distr::Normal;
use std::hint::black_box;

use rx_core::Logger;
use rx_frame::{Column, EventTable, WEIGHT_COLUMN};
use rx_misid::DensityEstimator;

const SUPPORT: (f64, f64) = (4500.0, 7060.0);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Peaked sample with a fifth of the weights negative, like a combined misID sample.
fn make_table(n_events: usize, seed: u64) -> EventTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let peak = Normal::new(5300.0, 150.0).unwrap();
    let mut xs = Vec::with_capacity(n_events);
    let mut ws = Vec::with_capacity(n_events);
    for i in 0..n_events {
        let x: f64 = if i % 2 == 0 { peak.sample(&mut rng) } else { rng.gen_range(SUPPORT.0..SUPPORT.1) };
        xs.push(x.clamp(SUPPORT.0, SUPPORT.1));
        let w: f64 = rng.gen_range(0.01..0.5);
        ws.push(if i % 5 == 0 { -0.25 * w } else { w });
    }
    EventTable::from_columns(vec![
        ("B_M".to_string(), Column::Float(xs)),
        (WEIGHT_COLUMN.to_string(), Column::Float(ws)),
    ])
    .unwrap()
}

fn grid(n: usize) -> Vec<f64> {
    let step = (SUPPORT.1 - SUPPORT.0) / (n - 1) as f64;
    (0..n).map(|i| SUPPORT.0 + step * i as f64).collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("kde_estimate");
    group.sample_size(30);

    let estimator = DensityEstimator::new(SUPPORT).unwrap().with_logger(Logger::silent());
    for &n in &[1_000, 10_000, 100_000] {
        let table = make_table(n, 42);
        group.bench_with_input(BenchmarkId::new("silverman", n), &n, |b, _| {
            b.iter(|| black_box(estimator.estimate(black_box(&table), "B_M").unwrap()))
        });
    }

    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("kde_evaluate");
    group.sample_size(50);

    let estimator = DensityEstimator::new(SUPPORT).unwrap().with_logger(Logger::silent());
    let points = grid(256);
    for &n in &[1_000, 10_000, 100_000] {
        let (model, _) = estimator.estimate(&make_table(n, 7), "B_M").unwrap();

        group.bench_with_input(BenchmarkId::new("grid_256", n), &n, |b, _| {
            b.iter(|| black_box(model.evaluate_many(black_box(&points))))
        });

        group.bench_with_input(BenchmarkId::new("integral", n), &n, |b, _| {
            b.iter(|| black_box(model.integral(black_box(5000.0), black_box(5600.0))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_estimate, bench_evaluate);
criterion_main!(benches);
