//! Micro benchmarks for tuple index appends, seeks and merged scans.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracedb::primitives::io::MemFileIo;
use tracedb::primitives::pager::{PagedFile, PagerOptions};
use tracedb::storage::btree::{BTreeStats, DeltaTree, EventRef, Match, SequenceTree};
use tracedb::storage::index::Attribute;
use tracedb::types::InternalPointer;
use tracedb::{Condition, DbConfig, EventRecord, TraceDb, TraceGenerator, WorkloadConfig};

const APPEND_COUNT: u64 = 32_768;
const SEEK_SAMPLES: usize = 4_096;
const TRACE_EVENTS: usize = 20_000;

fn pager() -> Arc<PagedFile> {
    let options = PagerOptions::default().page_size(4096).cache_bytes(4096 * 1024);
    Arc::new(PagedFile::create(Arc::new(MemFileIo::new()), options).expect("create pager"))
}

fn loaded_sequence(count: u64) -> SequenceTree<EventRef> {
    let tree = SequenceTree::new(pager(), Arc::new(BTreeStats::default()));
    for k in 0..count {
        tree.insert(k * 2, &EventRef(InternalPointer(k))).expect("insert");
    }
    tree
}

fn loaded_trace(events: &[EventRecord]) -> TraceDb {
    let db = TraceDb::in_memory(DbConfig::default()).expect("db");
    for record in events {
        db.append(record).expect("append");
    }
    db
}

fn micro_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/index");
    group.sample_size(30);

    group.throughput(Throughput::Elements(APPEND_COUNT));
    group.bench_function("sequence_append", |b| {
        b.iter_batched(
            || SequenceTree::<EventRef>::new(pager(), Arc::new(BTreeStats::default())),
            |tree| {
                for k in 0..APPEND_COUNT {
                    tree.insert(k, &EventRef(InternalPointer(k))).expect("insert");
                }
                black_box(tree.len());
            },
            BatchSize::SmallInput,
        );
    });

    let mut shuffled: Vec<u64> = (0..APPEND_COUNT).collect();
    shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(0x5eed));
    group.throughput(Throughput::Elements(APPEND_COUNT));
    group.bench_function("delta_random_insert", |b| {
        b.iter_batched(
            || DeltaTree::<EventRef>::new(pager(), Arc::new(BTreeStats::default())),
            |tree| {
                for &k in &shuffled {
                    tree.insert(k, &EventRef(InternalPointer(k))).expect("insert");
                }
                black_box(tree.len());
            },
            BatchSize::SmallInput,
        );
    });

    let tree = loaded_sequence(APPEND_COUNT);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let probes: Vec<u64> = (0..SEEK_SAMPLES).map(|_| rng.gen_range(0..APPEND_COUNT * 2)).collect();
    group.throughput(Throughput::Elements(SEEK_SAMPLES as u64));
    group.bench_function(BenchmarkId::new("sequence_seek", SEEK_SAMPLES), |b| {
        b.iter(|| {
            for &key in &probes {
                let mut it = tree.seek(key, Match::First).expect("seek");
                black_box(it.next().expect("next"));
            }
        });
    });

    let events = TraceGenerator::new(1, WorkloadConfig::default()).generate(TRACE_EVENTS);
    group.throughput(Throughput::Elements(TRACE_EVENTS as u64));
    group.bench_function("trace_append", |b| {
        b.iter(|| black_box(loaded_trace(&events).stats().events));
    });

    let db = loaded_trace(&events);
    let conditions = [
        ("thread", Condition::attribute(Attribute::Thread, 1)),
        (
            "thread_and_kind",
            Condition::and(vec![
                Condition::attribute(Attribute::Thread, 1),
                Condition::attribute(Attribute::Kind, 5),
            ]),
        ),
        (
            "field_or",
            Condition::or((1..=8).map(|f| Condition::attribute(Attribute::Field, f)).collect()),
        ),
    ];
    for (name, condition) in &conditions {
        group.bench_function(BenchmarkId::new("merged_scan", name), |b| {
            b.iter(|| {
                let mut cursor = db.evaluate(condition, 0).expect("evaluate");
                let mut hits = 0u64;
                while cursor.next().expect("next").is_some() {
                    hits += 1;
                }
                black_box(hits)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, micro_index);
criterion_main!(benches);
