//! Criterion benchmarks for the record hot paths.
//!
//! 1. normalize: raw provider frame -> canonical frame
//! 2. project: canonical frame -> adjusted / raw view
//! 3. freshness: one oracle decision

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use polars::prelude::DataFrame;

use quotecache_core::data::freshness::FreshnessPolicy;
use quotecache_core::data::schema::*;
use quotecache_core::data::transform::{normalize, project_frame};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_raw_frame(n: usize) -> DataFrame {
    let base_date = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    let dates: Vec<NaiveDate> = (0..n).map(|i| base_date + Duration::days(i as i64)).collect();
    let close: Vec<f64> = (0..n).map(|i| 100.0 + (i as f64 * 0.1).sin() * 10.0).collect();
    let adj: Vec<f64> = close.iter().map(|c| c * 0.95).collect();

    frame(vec![
        date_column(&dates).unwrap(),
        f64_column(OPEN, close.iter().map(|c| c - 0.3).collect()),
        f64_column(HIGH, close.iter().map(|c| c + 1.5).collect()),
        f64_column(LOW, close.iter().map(|c| c - 1.5).collect()),
        f64_column(CLOSE, close),
        f64_column(ADJ_CLOSE, adj),
        u64_column(VOLUME, vec![1_000_000; n]),
    ])
    .unwrap()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    for rows in [252, 2_520, 12_600] {
        let raw = make_raw_frame(rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &raw, |b, raw| {
            b.iter(|| normalize(black_box(raw)).unwrap())
        });
    }
    group.finish();
}

fn bench_project(c: &mut Criterion) {
    let mut group = c.benchmark_group("project");
    let canonical = normalize(&make_raw_frame(12_600)).unwrap();
    group.bench_function("adjusted_12600", |b| {
        b.iter(|| project_frame(black_box(&canonical), true).unwrap())
    });
    group.bench_function("raw_12600", |b| {
        b.iter(|| project_frame(black_box(&canonical), false).unwrap())
    });
    group.finish();
}

fn bench_freshness(c: &mut Criterion) {
    let policy = FreshnessPolicy::default();
    let last = Utc.with_ymd_and_hms(2024, 5, 14, 9, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 15, 0, 10, 0).unwrap();
    c.bench_function("is_fresh", |b| {
        b.iter(|| policy.is_fresh(black_box(&last), black_box(&now)))
    });
}

criterion_group!(benches, bench_normalize, bench_project, bench_freshness);
criterion_main!(benches);
