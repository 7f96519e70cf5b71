use criterion::{black_box, criterion_group, Criterion};

use common::testutil::test_facade;
use qproc::{ChunkSpec, QuerySession};
use std::sync::Arc;

const NEAR_NEIGHBOR: &str = "SELECT a.objectId, b.objectId FROM Object AS a, Object AS b \
     WHERE scisql_angSep(a.ra, a.dec, b.ra, b.dec) < 0.01 AND a.objectId <> b.objectId";

const SOURCE_JOIN: &str = "SELECT o.objectId, s.sourceId FROM Object AS o \
     JOIN Source AS s ON o.objectId = s.objectId WHERE o.flux > 3";

fn plan(sql: &str) -> QuerySession {
    let mut qs = QuerySession::new(Arc::new(test_facade()), "LSST");
    qs.set_query(sql).unwrap();
    qs
}

fn bench_plan_near_neighbor(c: &mut Criterion) {
    c.bench_function("plan_near_neighbor", |b| {
        b.iter(|| plan(black_box(NEAR_NEIGHBOR)))
    });
}

fn bench_plan_source_join(c: &mut Criterion) {
    c.bench_function("plan_source_join", |b| {
        b.iter(|| plan(black_box(SOURCE_JOIN)))
    });
}

fn bench_generate_chunk_queries(c: &mut Criterion) {
    let mut qs = plan(NEAR_NEIGHBOR);
    for chunk in 0..100 {
        qs.add_chunk(ChunkSpec::new(chunk, (0..20).collect()))
            .unwrap();
    }
    c.bench_function("generate_chunk_queries", |b| {
        b.iter(|| qs.chunk_queries().map(|cqs| cqs.fragments.len()).sum::<usize>())
    });
}

criterion_group! {
    name = planbench;
    config = Criterion::default().sample_size(10);
    targets =
    bench_plan_near_neighbor,
    bench_plan_source_join,
    bench_generate_chunk_queries,
}
