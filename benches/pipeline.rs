use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use criterion::{criterion_group, criterion_main};

use snapshot_features::{
    BookLevel, FeatureConfig, FeaturePipeline, SnapshotRow, SnapshotTable, BOOK_LEVELS,
};

// 2021-01-04 09:30:00 UTC.
const OPEN_MS: i64 = 1_609_752_600_000;
const SNAPSHOT_INTERVAL_MS: i64 = 3_000;
const ROWS_PER_SECURITY: usize = 2_400;

fn synthetic(securities: usize) -> SnapshotTable {
    let mut rows = Vec::with_capacity(securities * ROWS_PER_SECURITY);
    for s in 0..securities {
        let security = format!("{}", 600_000 + s);
        let mut price = 10.0 + s as f64;
        for i in 0..ROWS_PER_SECURITY {
            // Cheap deterministic walk.
            price += if (i * 7 + s) % 5 < 2 { 0.01 } else { -0.008 };
            let mut levels = [BookLevel::default(); BOOK_LEVELS];
            for (depth, level) in levels.iter_mut().enumerate() {
                let step = 0.01 * depth as f64;
                let qty = 100.0 + ((i + depth) % 13) as f64 * 10.0;
                *level = BookLevel::new(price - step, qty, price + 0.01 + step, qty + 50.0);
            }
            let ts = OPEN_MS + i as i64 * SNAPSHOT_INTERVAL_MS;
            rows.push(SnapshotRow::new(ts, security.as_str(), levels));
        }
    }
    SnapshotTable::new(rows)
}

fn bench_pipeline(c: &mut Criterion) {
    let data = synthetic(16);
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(data.len() as u64));
    for &jobs in &[1_usize, 4, 8] {
        let pipeline = FeaturePipeline::new(FeatureConfig {
            jobs,
            ..FeatureConfig::default()
        })
        .expect("pipeline");
        group.bench_with_input(BenchmarkId::new("jobs", jobs), &data, |b, data| {
            b.iter(|| pipeline.run(black_box(data)).expect("run"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
