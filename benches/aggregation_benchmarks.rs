//! Benchmarks for the aggregation hot path
//! Measures per-record folding, chunk scanning and merging

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use eventmill::compute::{
    aggregate_chunk, merge, plan, ChunkDescriptor, EventAggregator, EventRecord, ExecutionMethod,
    PartialResult,
};
use std::collections::BTreeMap;
use std::hint::black_box;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

const STATUSES: [&str; 4] = ["valid", "noise", "saturated", "invalid"];

fn records(count: usize) -> Vec<EventRecord> {
    (0..count)
        .map(|i| EventRecord {
            sensor_id: (i % 50 + 1).to_string(),
            energy: (i % 1000) as f64 * 0.37,
            status: STATUSES[i % STATUSES.len()].to_string(),
        })
        .collect()
}

fn events_file(rows: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "event_id,timestamp,sensor_id,energy,momentum_x,momentum_y,momentum_z,status"
    )
    .unwrap();
    for (i, record) in records(rows).iter().enumerate() {
        writeln!(
            file,
            "{},1735689600.0,{},{},1.5,-2.5,3.5,{}",
            i + 1,
            record.sensor_id,
            record.energy,
            record.status
        )
        .unwrap();
    }
    file
}

fn bench_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("consume");
    for size in [1_000, 100_000] {
        let input = records(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| {
                let mut aggregator = EventAggregator::new(0);
                for (row, record) in input.iter().enumerate() {
                    aggregator.consume(row as u64, record).unwrap();
                }
                black_box(aggregator.snapshot())
            });
        });
    }
    group.finish();
}

fn bench_aggregate_chunk(c: &mut Criterion) {
    let rows = 100_000u64;
    let file = events_file(rows as usize);
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("aggregate_chunk");
    group.throughput(Throughput::Elements(rows));
    group.sample_size(20);

    let whole = ChunkDescriptor {
        chunk_id: 0,
        start_row: 0,
        row_count: rows,
    };
    group.bench_function("whole_file", |b| {
        b.iter(|| black_box(aggregate_chunk(file.path(), &whole, 100.0, &cancel).unwrap()));
    });

    // The last of four chunks reads past three quarters of the file first
    let last = *plan(rows, 4).last().unwrap();
    group.bench_function("last_of_four", |b| {
        b.iter(|| black_box(aggregate_chunk(file.path(), &last, 100.0, &cancel).unwrap()));
    });
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let partials: Vec<PartialResult> = (0..64)
        .map(|chunk_id| PartialResult {
            chunk_id,
            total: 1_000,
            status_counts: STATUSES.iter().map(|s| (s.to_string(), 250)).collect(),
            sensor_counts: (1..=50).map(|s| (s.to_string(), 20)).collect::<BTreeMap<_, _>>(),
            energy_sum: chunk_id as f64 * 1234.5,
            high_energy_count: 150,
        })
        .collect();

    c.bench_function("merge_64_partials", |b| {
        b.iter(|| black_box(merge(partials.clone(), ExecutionMethod::InProcess, 64).unwrap()));
    });
}

criterion_group!(benches, bench_consume, bench_aggregate_chunk, bench_merge);
criterion_main!(benches);
