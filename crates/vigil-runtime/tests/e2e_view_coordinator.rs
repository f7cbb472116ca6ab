#![forbid(unsafe_code)]

//! End-to-end scenarios for [`ViewCoordinator`].
//!
//! Each test builds a store-owned graph, runs observation cycles the way a
//! rendering consumer would, mutates through the store, and checks which
//! views were replaced.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vigil_core::{ClassDef, ClassRegistry, Key, NodeRef, Snapshotter, Store, Value};
use vigil_runtime::reactive::{
    AccessFlags, Computed, CoordinatorConfig, CoordinatorState, Observed, ObservedView,
    SignalPolicy, StructuralPolicy, ViewCoordinator, ViewError,
};

fn view(observed: Observed) -> ObservedView {
    observed.into_view().expect("expected a view")
}

fn node(value: Option<Value>) -> NodeRef {
    value.and_then(Value::into_node).expect("expected a node")
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn counter_read_then_write() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("count", 0)]));
    let coord = ViewCoordinator::with_defaults(&store, &root);

    let first = view(coord.current_view());
    assert_eq!(first.get("count").as_f64(), Some(0.0));
    coord.finish_cycle();

    root.set("count", 1).unwrap();
    assert!(coord.scope().is_dirty(root.id()));

    let second = view(coord.current_view());
    assert!(!ObservedView::ptr_eq(&first, &second));
    assert_eq!(second.get("count").as_f64(), Some(1.0));
}

#[test]
fn sibling_write_is_not_a_dirty_read() {
    let store = Store::new();
    let a = NodeRef::record_from([("x", 1)]);
    let b = NodeRef::record_from([("y", 2)]);
    let root = store.adopt(NodeRef::record_from([("a", a.clone()), ("b", b.clone())]));
    let coord = ViewCoordinator::with_defaults(&store, &root);

    let root_1 = view(coord.current_view());
    let a_1 = view(root_1.get("a"));
    assert_eq!(a_1.get("x").as_f64(), Some(1.0));
    coord.finish_cycle();

    b.set("y", 3).unwrap();
    assert!(!coord.scope().has_dirty_read());

    let root_2 = view(coord.current_view());
    let a_2 = view(root_2.get("a"));
    assert!(ObservedView::ptr_eq(&root_1, &root_2));
    assert!(ObservedView::ptr_eq(&a_1, &a_2));
    assert_eq!(view(root_2.get("b")).get("y").as_f64(), Some(3.0));
    assert_eq!(coord.stats().last_evicted, 0);
}

#[test]
fn push_dirties_only_length_readers() {
    let store = Store::new();
    let todos = store.adopt(NodeRef::array_from([NodeRef::record_from([("title", "b1")])]));

    let title_reader = ViewCoordinator::with_defaults(&store, &todos);
    let length_reader = ViewCoordinator::with_defaults(&store, &todos);
    let key_reader = ViewCoordinator::with_defaults(&store, &todos);

    let title_view = title_reader.observe(|v| {
        let arr = v.as_view().expect("array view");
        let first = view(arr.get(Key::Index(0)));
        assert_eq!(first.get("title").as_str(), Some("b1"));
        arr.clone()
    });
    let length_view = length_reader.observe(|v| {
        let arr = v.as_view().expect("array view");
        assert_eq!(arr.len(), 1);
        arr.clone()
    });
    let key_view = key_reader.observe(|v| {
        let arr = v.as_view().expect("array view");
        assert_eq!(arr.keys().len(), 1);
        arr.clone()
    });

    todos.push(NodeRef::record_from([("title", "b2")])).unwrap();

    assert!(!title_reader.scope().has_dirty_read());
    assert!(length_reader.scope().has_dirty_read());
    assert!(key_reader.scope().has_dirty_read());

    assert!(ObservedView::ptr_eq(&title_view, &view(title_reader.current_view())));
    let fresh = view(length_reader.current_view());
    assert!(!ObservedView::ptr_eq(&length_view, &fresh));
    assert_eq!(fresh.len(), 2);
    assert!(!ObservedView::ptr_eq(&key_view, &view(key_reader.current_view())));
}

// ─── Ancestor invalidation ───────────────────────────────────────────────────

fn deep_graph(store: &Store) -> (NodeRef, NodeRef, NodeRef) {
    let leaf = NodeRef::record_from([("v", 1)]);
    let mid = NodeRef::record_from([("leaf", leaf.clone())]);
    let root = store.adopt(NodeRef::record_from([("mid", mid.clone())]));
    (root, mid, leaf)
}

#[test]
fn deep_change_invalidates_the_access_path() {
    let store = Store::new();
    let (root, _mid, leaf) = deep_graph(&store);
    let coord = ViewCoordinator::with_defaults(&store, &root);

    let (r1, m1, l1) = coord.observe(|v| {
        let r = v.as_view().cloned().expect("root view");
        let m = view(r.get("mid"));
        let l = view(m.get("leaf"));
        let _ = l.get("v");
        (r, m, l)
    });

    leaf.set("v", 2).unwrap();
    let (r2, m2, l2) = coord.observe(|v| {
        let r = v.as_view().cloned().expect("root view");
        let m = view(r.get("mid"));
        let l = view(m.get("leaf"));
        (r, m, l)
    });

    assert!(!ObservedView::ptr_eq(&r1, &r2));
    assert!(!ObservedView::ptr_eq(&m1, &m2));
    assert!(!ObservedView::ptr_eq(&l1, &l2));
    assert_eq!(coord.stats().last_evicted, 3);
}

#[test]
fn local_invalidation_keeps_ancestors() {
    let store = Store::new();
    let (root, _mid, leaf) = deep_graph(&store);
    let config = CoordinatorConfig::default().with_ancestor_invalidation(false);
    let coord = ViewCoordinator::new(&store, &root, config);

    let (r1, m1, l1) = coord.observe(|v| {
        let r = v.as_view().cloned().expect("root view");
        let m = view(r.get("mid"));
        let l = view(m.get("leaf"));
        let _ = l.get("v");
        (r, m, l)
    });

    leaf.set("v", 2).unwrap();
    let r2 = view(coord.current_view());
    let m2 = view(r2.get("mid"));
    let l2 = view(m2.get("leaf"));

    assert!(ObservedView::ptr_eq(&r1, &r2));
    assert!(ObservedView::ptr_eq(&m1, &m2));
    assert!(!ObservedView::ptr_eq(&l1, &l2));
    assert_eq!(l2.get("v").as_f64(), Some(2.0));
}

#[test]
fn diamond_invalidates_both_parents() {
    let store = Store::new();
    let shared = NodeRef::record_from([("v", 0)]);
    let left = NodeRef::record_from([("shared", shared.clone())]);
    let right = NodeRef::record_from([("shared", shared.clone())]);
    let root = store.adopt(NodeRef::record_from([("left", left), ("right", right)]));
    let coord = ViewCoordinator::with_defaults(&store, &root);

    let (l1, r1, s1) = coord.observe(|v| {
        let root = v.as_view().expect("root view");
        let l = view(root.get("left"));
        let r = view(root.get("right"));
        let s = view(l.get("shared"));
        assert!(ObservedView::ptr_eq(&s, &view(r.get("shared"))));
        let _ = s.get("v");
        (l, r, s)
    });

    shared.set("v", 1).unwrap();
    coord.observe(|v| {
        let root = v.as_view().expect("root view");
        assert!(!ObservedView::ptr_eq(&l1, &view(root.get("left"))));
        assert!(!ObservedView::ptr_eq(&r1, &view(root.get("right"))));
        let shared = view(view(root.get("left")).get("shared"));
        assert!(!ObservedView::ptr_eq(&s1, &shared));
    });
}

// ─── Structural changes ──────────────────────────────────────────────────────

#[test]
fn key_creation_is_seen_by_enumeration_and_by_its_own_key() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("a", 1)]));

    let keyed = ViewCoordinator::with_defaults(&store, &root);
    let missing = ViewCoordinator::with_defaults(&store, &root);
    let has = ViewCoordinator::with_defaults(&store, &root);

    keyed.observe(|v| {
        let _ = v.as_view().map(|v| v.get("a"));
    });
    missing.observe(|v| {
        assert!(v.as_view().is_some_and(|v| v.get("b").as_value().is_some_and(Value::is_null)));
    });
    has.observe(|v| {
        assert!(!v.as_view().is_some_and(|v| v.has("b")));
    });
    assert_eq!(has.scope().access_flags(root.id()), AccessFlags::HAS);

    root.set("b", 2).unwrap();
    assert!(!keyed.scope().has_dirty_read());
    assert!(missing.scope().has_dirty_read());
    assert!(has.scope().has_dirty_read());
}

#[test]
fn any_access_policy_sees_structure_everywhere() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("a", 1)]));
    let config = CoordinatorConfig::default().with_structural_policy(StructuralPolicy::AnyAccess);
    let coord = ViewCoordinator::new(&store, &root, config);

    coord.observe(|v| {
        let _ = v.as_view().map(|v| v.get("a"));
    });
    root.set("b", 2).unwrap();
    assert!(coord.scope().has_dirty_read());
}

#[test]
fn array_remove_shifts_are_value_changes() {
    let store = Store::new();
    let items = store.adopt(NodeRef::array_from([1, 2, 3]));
    let coord = ViewCoordinator::with_defaults(&store, &items);

    coord.observe(|v| {
        let _ = v.as_view().map(|v| v.get(Key::Index(0)));
    });
    items.remove(1).unwrap();
    // Index 0 is untouched by removing index 1.
    assert!(!coord.scope().has_dirty_read());

    coord.observe(|v| {
        let _ = v.as_view().map(|v| v.get(Key::Index(1)));
    });
    items.insert(0, 0).unwrap();
    assert!(coord.scope().has_dirty_read());
}

// ─── Scopes, signals, cancellation ──────────────────────────────────────────

#[test]
fn child_consumer_tracks_independently() {
    let store = Store::new();
    let profile = NodeRef::record_from([("name", "ada"), ("age", "36")]);
    let root = store.adopt(NodeRef::record_from([("profile", profile.clone())]));

    let parent = ViewCoordinator::with_defaults(&store, &root);
    let handed_down = parent.observe(|v| v.as_view().expect("root").get("profile"));

    // The child re-observes what the parent passed it.
    let child = ViewCoordinator::with_defaults(&store, handed_down);
    child.observe(|v| {
        assert_eq!(v.as_view().expect("profile").get("name").as_str(), Some("ada"));
    });

    profile.set("name", "grace").unwrap();
    assert!(child.scope().has_dirty_read());
    assert!(!parent.scope().has_dirty_read());
    assert_eq!(child.scope().accessed_keys(profile.id()), vec![Key::from("name")]);
    assert!(parent.scope().accessed_keys(profile.id()).is_empty());
}

#[test]
fn subscriber_pulls_fresh_view_on_notify() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("count", 0)]));
    let coord = Rc::new(ViewCoordinator::with_defaults(&store, &root));
    coord.observe(|v| {
        let _ = v.as_view().map(|v| v.get("count"));
    });

    let renders = Rc::new(RefCell::new(Vec::new()));
    let renders_clone = Rc::clone(&renders);
    let weak = Rc::downgrade(&coord);
    let _sub = coord.subscribe(move |_| {
        let Some(coord) = weak.upgrade() else { return };
        let seen = coord.observe(|v| v.as_view().and_then(|v| v.get("count").as_f64()));
        renders_clone.borrow_mut().push(seen);
    });

    root.set("count", 1).unwrap();
    store.batch(|| {
        root.set("count", 2).unwrap();
        root.set("count", 3).unwrap();
    });
    assert_eq!(*renders.borrow(), vec![Some(1.0), Some(3.0)]);
    assert_eq!(coord.state(), CoordinatorState::Idle);
}

#[test]
fn dirty_reads_only_policy_filters_signals() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("seen", 0), ("unseen", 0)]));
    let config = CoordinatorConfig::default().with_signal_policy(SignalPolicy::DirtyReadsOnly);
    let coord = ViewCoordinator::new(&store, &root, config);
    let signals = Rc::new(Cell::new(0u32));
    let signals_clone = Rc::clone(&signals);
    let _sub = coord.subscribe(move |_| signals_clone.set(signals_clone.get() + 1));

    coord.observe(|v| {
        let _ = v.as_view().map(|v| v.get("seen"));
    });
    root.set("unseen", 1).unwrap();
    assert_eq!(signals.get(), 0);
    root.set("seen", 1).unwrap();
    assert_eq!(signals.get(), 1);
}

#[test]
fn detach_stops_change_recording() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("count", 0)]));
    let coord = ViewCoordinator::with_defaults(&store, &root);
    coord.observe(|v| {
        let _ = v.as_view().map(|v| v.get("count"));
    });

    coord.detach();
    root.set("count", 1).unwrap();
    assert!(!coord.scope().has_dirty_read());
    assert_eq!(coord.revision(), 0);
    assert_eq!(coord.stats().scope.tracker.changes, 0);
}

#[test]
fn dropping_the_coordinator_frees_bookkeeping() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("count", 0)]));
    let survivor = {
        let coord = ViewCoordinator::with_defaults(&store, &root);
        coord.observe(|v| v.as_view().cloned().expect("root view"))
    };
    assert_eq!(store.subscriber_count(), 0);
    assert!(!survivor.is_scoped());
    root.set("count", 5).unwrap();
    assert_eq!(survivor.get("count").as_f64(), Some(5.0));
}

#[test]
fn dropped_nodes_are_collectible() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("child", NodeRef::record_from([("v", 1)]))]));
    let coord = ViewCoordinator::with_defaults(&store, &root);

    let weak_child = coord.observe(|v| {
        let child = view(v.as_view().expect("root").get("child"));
        let _ = child.get("v");
        child.raw().downgrade()
    });
    root.delete(&Key::from("child")).unwrap();
    assert!(!weak_child.is_alive());

    let _ = coord.current_view();
    assert!(coord.stats().scope.tracker.tracked_nodes <= 1);
}

// ─── Read-only snapshots ─────────────────────────────────────────────────────

#[test]
fn snapshot_views_reject_writes_but_track_reads() {
    let store = Store::new();
    let todo = store.instance("Todo");
    todo.set("title", "b1").unwrap();
    let meta = NodeRef::record_from([("owner", "ada")]);
    let root = store.adopt(NodeRef::record_from([("todo", todo), ("meta", meta)]));

    let mut registry = ClassRegistry::new();
    registry.register(
        "Todo",
        ClassDef::new().getter("shout", |node| {
            let title = node
                .get(&Key::from("title"))
                .and_then(|v| v.as_str().map(str::to_uppercase))
                .unwrap_or_default();
            Value::from(title)
        }),
    );
    let mut snapshotter = Snapshotter::new(registry);
    let snapshot = snapshotter.snapshot(&root);

    let coord = ViewCoordinator::with_defaults(&store, &snapshot);
    coord.observe(|v| {
        let root = v.as_view().expect("root view");
        assert!(root.is_read_only());

        let meta = view(root.get("meta"));
        assert!(meta.is_read_only());
        assert_eq!(meta.get("owner").as_str(), Some("ada"));
        assert!(matches!(
            meta.set("owner", "grace"),
            Err(ViewError::ReadOnly { .. })
        ));

        // Class instances stay opaque; the flattened getter is a plain field.
        let todo = node(root.get("todo").as_value().cloned());
        assert_eq!(
            todo.get(&Key::from("shout")).and_then(|v| v.as_str().map(str::to_owned)),
            Some("B1".to_owned())
        );
    });

    let mut read = coord.scope().accessed_keys(snapshot.id());
    read.sort();
    assert_eq!(read, vec![Key::from("meta"), Key::from("todo")]);
}

// ─── Computed ────────────────────────────────────────────────────────────────

#[test]
fn computed_recomputes_only_on_relevant_writes() {
    let store = Store::new();
    let root = store.adopt(NodeRef::record_from([("a", 1), ("b", 10)]));
    let runs = Rc::new(Cell::new(0u32));
    let runs_clone = Rc::clone(&runs);
    let doubled = Computed::track(&store, &root, move |v| {
        runs_clone.set(runs_clone.get() + 1);
        v.as_view().and_then(|v| v.get("a").as_f64()).unwrap_or(0.0) * 2.0
    });

    assert_eq!(doubled.get(), 2.0);
    root.set("b", 11).unwrap();
    assert_eq!(doubled.get(), 2.0);
    assert_eq!(runs.get(), 1);

    root.set("a", 4).unwrap();
    assert_eq!(doubled.get(), 8.0);
    assert_eq!(runs.get(), 2);
}

#[test]
fn computed_over_nested_nodes() {
    let store = Store::new();
    let items = NodeRef::array_from([1, 2, 3]);
    let root = store.adopt(NodeRef::record_from([("items", items.clone())]));
    let sum = Computed::track(&store, &root, |v| {
        v.as_view()
            .and_then(|v| v.get("items").into_view())
            .map_or(0.0, |items| items.iter().filter_map(|(_, x)| x.as_f64()).sum::<f64>())
    });

    assert_eq!(sum.get(), 6.0);
    items.push(4).unwrap();
    assert_eq!(sum.get(), 10.0);
    items.set(Key::Index(0), 0).unwrap();
    assert_eq!(sum.get(), 9.0);
    assert_eq!(sum.version(), 3);

    let raw = node(root.get(&Key::from("items")));
    assert!(NodeRef::ptr_eq(&raw, &items));
}
