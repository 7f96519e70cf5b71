use criterion::{criterion_group, Criterion};

use common::task_msg::{TaskFragment, TaskMsg};
use common::SessionId;
use rand::Rng;
use std::sync::Arc;
use wsched::{ChunkDisk, Task};

fn scan_task(session: SessionId, chunk: i32) -> Arc<Task> {
    Arc::new(Task::new(TaskMsg {
        session,
        db: String::from("LSST"),
        chunk_id: chunk,
        scan_tables: vec![String::from("Object")],
        fragments: vec![TaskFragment {
            subchunks: Vec::new(),
            result_table: String::from("r"),
            queries: vec![format!("SELECT * FROM LSST.Object_{}", chunk)],
        }],
    }))
}

fn bench_chunk_disk(c: &mut Criterion) {
    let session = SessionId::new();
    let mut rng = rand::thread_rng();
    let tasks: Vec<Arc<Task>> = (0..1000)
        .map(|_| scan_task(session, rng.gen_range(0..200)))
        .collect();
    c.bench_function("chunk_disk_scan", |b| {
        b.iter(|| {
            let disk = ChunkDisk::new();
            for t in tasks.iter() {
                disk.enqueue(t.clone());
            }
            let mut n = 0;
            while let Some(t) = disk.get_next(true) {
                disk.register_inflight(&t);
                disk.remove_inflight(&t);
                n += 1;
            }
            n
        })
    });
}

criterion_group! {
    name = schedbench;
    config = Criterion::default().sample_size(10);
    targets = bench_chunk_disk,
}
