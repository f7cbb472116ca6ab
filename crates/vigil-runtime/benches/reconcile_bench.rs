//! Benchmarks for observation cycles and reconciliation.
//!
//! Run with: cargo bench -p vigil-runtime

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use vigil_core::{Key, NodeRef, Store, Value};
use vigil_runtime::reactive::{
    AccessChangeTracker, AccessFlags, CoordinatorConfig, TrackerConfig, ViewCoordinator,
};

fn wide_graph(store: &Store, rows: usize) -> (NodeRef, Vec<NodeRef>) {
    let items: Vec<NodeRef> = (0..rows)
        .map(|i| NodeRef::record_from([("id", Value::from(i as u32)), ("title", Value::from("row"))]))
        .collect();
    let list = NodeRef::array_from(items.iter().cloned());
    let root = store.adopt(NodeRef::record_from([("items", list)]));
    (root, items)
}

fn read_all(coord: &ViewCoordinator) -> usize {
    coord.observe(|v| {
        let Some(list) = v.as_view().and_then(|root| root.get("items").into_view()) else {
            return 0;
        };
        list.iter()
            .filter_map(|(_, row)| row.into_view())
            .filter(|row| row.get("title").as_str().is_some())
            .count()
    })
}

// ============================================================================
// Tracker
// ============================================================================

fn bench_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");

    for nodes in [16usize, 256, 4096] {
        let graph: Vec<NodeRef> = (0..nodes).map(|_| NodeRef::record()).collect();
        let keys: Vec<Key> = (0..8).map(|k| Key::from(format!("k{k}"))).collect();

        group.bench_with_input(BenchmarkId::new("record_and_reconcile", nodes), &(), |b, _| {
            b.iter(|| {
                let mut tracker = AccessChangeTracker::new(TrackerConfig::default());
                for (i, node) in graph.iter().enumerate() {
                    tracker.record_access(node, &keys[i % keys.len()]);
                    tracker.record_flags(node, AccessFlags::OWN_KEYS);
                }
                for node in graph.iter().step_by(7) {
                    tracker.record_change(node, &keys[3], false);
                }
                black_box(tracker.reconcile().len())
            })
        });

        let mut warm = AccessChangeTracker::new(TrackerConfig::default());
        for node in &graph {
            warm.record_access(node, &keys[0]);
        }
        group.bench_with_input(BenchmarkId::new("short_circuit", nodes), &(), |b, _| {
            b.iter(|| black_box(warm.has_dirty_read()))
        });
    }

    group.finish();
}

// ============================================================================
// Coordinator
// ============================================================================

fn bench_coordinator(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator");

    for rows in [10usize, 100, 1000] {
        let store = Store::new();
        let (root, items) = wide_graph(&store, rows);
        let coord = ViewCoordinator::new(&store, &root, CoordinatorConfig::default());
        read_all(&coord);

        group.bench_with_input(BenchmarkId::new("clean_cycle", rows), &(), |b, _| {
            b.iter(|| black_box(read_all(&coord)))
        });

        let counter = std::cell::Cell::new(0u32);
        group.bench_with_input(BenchmarkId::new("one_dirty_row", rows), &(), |b, _| {
            b.iter(|| {
                counter.set(counter.get() + 1);
                items[rows / 2]
                    .set("title", format!("row {}", counter.get()))
                    .ok();
                black_box(read_all(&coord))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tracker, bench_coordinator);
criterion_main!(benches);
