//! Benchmarks for the sample reorder transform
//!
//! Every received frame goes through one reorder, so this bounds the
//! per-frame CPU cost of the receiver task. Measured per ping mode at the
//! largest samples-per-beam the devices allow.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sonarlink::frame::{reorder, restore_acquisition_order};
use sonarlink::test_utils::raw_samples;
use sonarlink::{MAX_SAMPLES_PER_BEAM, PingMode};
use std::hint::black_box;

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder");
    for &mode in PingMode::ALL {
        for samples_per_beam in [512, MAX_SAMPLES_PER_BEAM as usize] {
            let samples = raw_samples(mode, samples_per_beam);
            group.throughput(Throughput::Bytes(samples.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("mode_{}", mode.code()), samples_per_beam),
                &samples,
                |b, samples| {
                    b.iter(|| {
                        black_box(reorder(mode, samples_per_beam, black_box(samples)).unwrap())
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_restore(c: &mut Criterion) {
    let mode = PingMode::Mode9;
    let samples = raw_samples(mode, 1024);
    let ordered = reorder(mode, 1024, &samples).unwrap();

    c.bench_function("restore_acquisition_order_mode_9", |b| {
        b.iter(|| black_box(restore_acquisition_order(mode, 1024, black_box(&ordered)).unwrap()))
    });
}

criterion_group!(benches, bench_reorder, bench_restore);
criterion_main!(benches);
