use criterion::{criterion_group, Criterion};

use common::testutil::gen_csv_rows;
use qdisp::{ResultReceiver, TableMerger};
use std::io::Cursor;
use std::sync::Arc;

fn merge_all(data: &[u8], buffer_size: usize) -> usize {
    let merger = Arc::new(TableMerger::new(None));
    let receiver = ResultReceiver::new(merger, "bench", buffer_size);
    receiver.read_from(Cursor::new(data)).unwrap();
    receiver.merged_bytes()
}

fn bench_merge_small_buffer(c: &mut Criterion) {
    let data = gen_csv_rows(10_000, 6);
    c.bench_function("merge_small_buffer", |b| b.iter(|| merge_all(&data, 1024)));
}

fn bench_merge_large_buffer(c: &mut Criterion) {
    let data = gen_csv_rows(10_000, 6);
    c.bench_function("merge_large_buffer", |b| {
        b.iter(|| merge_all(&data, 1024 * 1024))
    });
}

criterion_group! {
    name = mergebench;
    config = Criterion::default().sample_size(10);
    targets =
    bench_merge_small_buffer,
    bench_merge_large_buffer,
}
