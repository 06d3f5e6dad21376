//! Criterion benchmarks for Tessera.
//!
//! Covers the hot paths of query evaluation:
//! - Leaf lookup with bitmask filtering
//! - AND (cursor intersection) and OR (k-way merge) over large posting lists
//! - Document insertion through the indexer

use std::hint::black_box;

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use tessera::document::Document;
use tessera::index::{BitsFilter, Indexer, InvertedIndex, Posting, ReverseIndex, intersect, union};
use tessera::query::TermQuery;
use tessera::storage::{StoreConfig, StoreKind};

const WORDS: &[&str] = &[
    "search", "engine", "index", "query", "document", "field", "term", "shard", "lease", "worker",
    "posting", "filter", "bitmask", "replica", "group", "router",
];

/// Generate documents with 8 keywords each, picked deterministically from `WORDS`.
fn generate_documents(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            let mut builder = Document::builder(format!("doc-{i}")).bits((i % 16) as u64);
            for k in 0..8 {
                builder = builder.keyword("content", WORDS[(i * 7 + k * 3) % WORDS.len()]);
            }
            let mut doc = builder.build();
            doc.seq_id = i as u64 + 1;
            doc
        })
        .collect()
}

fn populated_index(count: usize) -> InvertedIndex {
    let index = InvertedIndex::new(count);
    for doc in generate_documents(count) {
        index.add(&doc);
    }
    index
}

fn postings(step: u64, len: u64) -> Vec<Posting> {
    (0..len).map(|i| Posting::new(i * step, "d", 0)).collect()
}

fn bench_reverse_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse_index");
    let index = populated_index(50_000);

    let leaf = TermQuery::term("content", "search");
    group.bench_function("leaf_search", |b| {
        b.iter(|| black_box(index.search(black_box(&leaf), &BitsFilter::none())))
    });

    let filter = BitsFilter::new(0b0001, 0b1000, vec![0b0110]);
    group.bench_function("leaf_search_filtered", |b| {
        b.iter(|| black_box(index.search(black_box(&leaf), &filter)))
    });

    let and = TermQuery::term("content", "search").and([
        TermQuery::term("content", "index"),
        TermQuery::term("content", "shard"),
    ]);
    group.bench_function("and_search", |b| {
        b.iter(|| black_box(index.search(black_box(&and), &BitsFilter::none())))
    });

    let or = TermQuery::term("content", "lease").or([
        TermQuery::term("content", "worker"),
        TermQuery::term("content", "router"),
    ]);
    group.bench_function("or_search", |b| {
        b.iter(|| black_box(index.search(black_box(&or), &BitsFilter::none())))
    });

    group.finish();
}

fn bench_set_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_algebra");
    group.throughput(Throughput::Elements(300_000));

    group.bench_function("intersect_3x100k", |b| {
        b.iter_batched(
            || vec![postings(2, 100_000), postings(3, 100_000), postings(5, 100_000)],
            |lists| black_box(intersect(lists)),
            BatchSize::LargeInput,
        )
    });

    group.bench_function("union_3x100k", |b| {
        b.iter_batched(
            || vec![postings(2, 100_000), postings(3, 100_000), postings(5, 100_000)],
            |lists| black_box(union(lists)),
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("indexing");
    group.sample_size(20);
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("add_1000_documents", |b| {
        b.iter_batched(
            || {
                let indexer = Indexer::open(&StoreConfig::new(StoreKind::Memory, ""), 1_000)
                    .expect("memory store");
                (indexer, generate_documents(1_000))
            },
            |(indexer, docs)| {
                for doc in docs {
                    indexer.add_doc(doc).expect("add");
                }
                black_box(indexer)
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_reverse_index, bench_set_algebra, bench_indexing);
criterion_main!(benches);
