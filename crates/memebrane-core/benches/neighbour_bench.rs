//! # Neighbour Benchmarks
//!
//! Performance benchmarks for merging subgraphs and answering neighbour queries.
//!
//! Run with: `cargo bench -p memebrane-core`

#![allow(clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use memebrane_core::{
    BrainId, EntityStore, MergeEngine, NeighbourOptions, NodeId, SearchRequest, gate_counts,
    neighbours, search,
};
use serde_json::{Value, json};
use std::hint::black_box;
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

/// A hub with `size` children, shaped like a remote graph response.
fn star_payload(brain: BrainId, hub: NodeId, size: usize) -> Value {
    let stamp = "2024-01-01T00:00:00Z";
    let mut thoughts = vec![json!({
        "id": hub.to_string(), "brainId": brain.to_string(), "name": "hub",
        "modificationDateTime": stamp
    })];
    let mut links = Vec::with_capacity(size);
    for i in 0..size {
        let spoke = NodeId(Uuid::new_v4());
        thoughts.push(json!({
            "id": spoke.to_string(), "brainId": brain.to_string(),
            "name": format!("spoke number {}", i), "modificationDateTime": stamp
        }));
        links.push(json!({
            "id": Uuid::new_v4().to_string(), "brainId": brain.to_string(),
            "thoughtIdA": hub.to_string(), "thoughtIdB": spoke.to_string(),
            "relation": 1, "modificationDateTime": stamp
        }));
    }
    json!({"root": {"id": hub.to_string()}, "thoughts": thoughts, "links": links})
}

fn star_store(size: usize) -> (TempDir, EntityStore, BrainId, NodeId) {
    let dir = tempdir().unwrap();
    let store = EntityStore::open(dir.path().join("bench.redb")).unwrap();
    let brain = BrainId(Uuid::new_v4());
    let hub = NodeId(Uuid::new_v4());
    let read_at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    MergeEngine::merge_value(&store, brain, &star_payload(brain, hub, size), false, read_at)
        .unwrap();
    (dir, store, brain, hub)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_star");
    let read_at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

    for size in [10, 100, 1000].iter() {
        let (_dir, store, brain, hub) = star_store(0);
        let payload = star_payload(brain, hub, *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                black_box(MergeEngine::merge_value(&store, brain, &payload, true, read_at))
            });
        });
    }

    group.finish();
}

fn bench_neighbours(c: &mut Criterion) {
    let mut group = c.benchmark_group("neighbours_star");

    for size in [10, 100, 1000].iter() {
        let (_dir, store, brain, hub) = star_store(*size);
        let subject = store.get_node(brain, hub).unwrap().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(neighbours(&store, &subject, &NeighbourOptions::default())));
        });
    }

    group.finish();
}

fn bench_gate_counts(c: &mut Criterion) {
    let (_dir, store, brain, hub) = star_store(100);
    let subject = store.get_node(brain, hub).unwrap().unwrap();
    c.bench_function("gate_counts_star_100", |b| {
        b.iter(|| black_box(gate_counts(&store, &subject, &NeighbourOptions::default())));
    });
}

fn bench_search(c: &mut Criterion) {
    let (_dir, store, brain, _) = star_store(1000);
    let request = SearchRequest::new("spoke 42");
    c.bench_function("search_star_1000", |b| {
        b.iter(|| black_box(search(&store, brain, &request)));
    });
}

criterion_group!(
    benches,
    bench_merge,
    bench_neighbours,
    bench_gate_counts,
    bench_search
);
criterion_main!(benches);
