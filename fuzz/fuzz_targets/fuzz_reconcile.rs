#![no_main]

//! Arbitrary read/write interleavings over a small store-owned graph.
//!
//! Checks that nothing panics, that a node whose read key was written always
//! gets a fresh view, and that a node nobody wrote keeps its view.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vigil_core::{Key, NodeRef, Store, Value};
use vigil_runtime::{CoordinatorConfig, ObservedView, ViewCoordinator};

const CHILDREN: usize = 4;
const KEYS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Read { child: u8, key: u8 },
    Has { child: u8, key: u8 },
    Keys { child: u8 },
    Write { child: u8, key: u8, value: i32 },
    Delete { child: u8, key: u8 },
    Push { value: i32 },
    Pop,
    Cycle,
}

fn key(k: u8) -> Key {
    Key::from(KEYS[k as usize % KEYS.len()])
}

fn child_view(root: &ObservedView, child: u8) -> Option<ObservedView> {
    root.get("children")
        .into_view()?
        .get(Key::Index(child as usize % CHILDREN))
        .into_view()
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let store = Store::new();
    let children: Vec<NodeRef> = (0..CHILDREN)
        .map(|i| NodeRef::record_from([("a", Value::from(i as i32))]))
        .collect();
    let list = NodeRef::array_from(children.iter().cloned());
    let tail = NodeRef::array();
    let root = store.adopt(NodeRef::record_from([
        ("children", Value::from(&list)),
        ("tail", Value::from(&tail)),
    ]));
    let coord = ViewCoordinator::new(&store, &root, CoordinatorConfig::default());

    let mut views: Vec<Option<ObservedView>> = vec![None; CHILDREN];
    let mut read: Vec<Vec<Key>> = vec![Vec::new(); CHILDREN];
    let mut written: Vec<Vec<Key>> = vec![Vec::new(); CHILDREN];
    let mut touched = [false; CHILDREN];
    let mut root_view = coord.current_view().into_view();

    for op in ops.into_iter().take(256) {
        let Some(rv) = root_view.clone() else { return };
        match op {
            FuzzOp::Read { child, key: k } => {
                if let Some(view) = child_view(&rv, child) {
                    let _ = view.get(key(k));
                    let idx = child as usize % CHILDREN;
                    read[idx].push(key(k));
                    views[idx] = Some(view);
                }
            }
            FuzzOp::Has { child, key: k } => {
                if let Some(view) = child_view(&rv, child) {
                    let _ = view.has(key(k));
                }
            }
            FuzzOp::Keys { child } => {
                if let Some(view) = child_view(&rv, child) {
                    let _ = view.keys();
                }
            }
            FuzzOp::Write { child, key: k, value } => {
                let idx = child as usize % CHILDREN;
                touched[idx] = true;
                let before = children[idx].get(&key(k));
                let _ = children[idx].set(key(k), value);
                if before != children[idx].get(&key(k)) {
                    written[idx].push(key(k));
                }
            }
            FuzzOp::Delete { child, key: k } => {
                let idx = child as usize % CHILDREN;
                touched[idx] = true;
                if let Ok(true) = children[idx].delete(&key(k)) {
                    written[idx].push(key(k));
                }
            }
            FuzzOp::Push { value } => {
                if tail.len() < 64 {
                    let _ = tail.push(value);
                }
            }
            FuzzOp::Pop => {
                let _ = tail.pop();
            }
            FuzzOp::Cycle => {
                coord.finish_cycle();
                root_view = coord.current_view().into_view();
                let Some(rv) = root_view.clone() else { return };
                for idx in 0..CHILDREN {
                    let Some(old) = views[idx].take() else {
                        read[idx].clear();
                        written[idx].clear();
                        touched[idx] = false;
                        continue;
                    };
                    let hit = read[idx].iter().any(|k| written[idx].contains(k));
                    let list_view = rv.get("children").into_view();
                    if let Some(fresh) = list_view.and_then(|l| l.get(Key::Index(idx)).into_view())
                    {
                        if hit {
                            assert!(!ObservedView::ptr_eq(&old, &fresh));
                        } else if !touched[idx] {
                            assert!(ObservedView::ptr_eq(&old, &fresh));
                        }
                    }
                    read[idx].clear();
                    written[idx].clear();
                    touched[idx] = false;
                }
            }
        }
    }
});
