#![forbid(unsafe_code)]

//! Memoized selectors over a tracked graph.
//!
//! # Design
//!
//! [`Computed<T>`] owns a private [`ViewCoordinator`] configured to signal
//! only on dirty reads. The selector runs inside one observation cycle, so
//! exactly the keys it read are recorded. A later write marks the computed
//! value dirty only if it intersects those reads; the next
//! [`get()`](Computed::get) then re-runs the selector. Writes to anything the
//! selector did not look at never cause a recomputation.
//!
//! # Invariants
//!
//! 1. `get()` never returns a value computed before a write that touched
//!    something the selector read.
//! 2. The selector runs at most once per dirtying write batch.
//! 3. Version increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Selector panics**: the cached value is dropped and the next `get()`
//!   recomputes.
//! - **Store dropped**: no further writes can be delivered; the cached value
//!   is kept and never becomes dirty again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use vigil_core::Store;

use super::config::{CoordinatorConfig, SignalPolicy};
use super::coordinator::ViewCoordinator;
use super::observable::Subscription;
use super::view::Observed;

struct ComputedInner<T> {
    coordinator: ViewCoordinator,
    select: Box<dyn Fn(&Observed) -> T>,
    /// `None` before the first computation and after an invalidation.
    cached: Option<T>,
    dirty: Rc<Cell<bool>>,
    version: u64,
    _subscription: Subscription,
}

impl<T> ComputedInner<T> {
    fn refresh(&mut self) -> &T {
        if self.dirty.replace(false) {
            self.cached = None;
        }
        let Self {
            coordinator,
            select,
            cached,
            version,
            ..
        } = self;
        let select = &**select;
        cached.get_or_insert_with(|| {
            *version += 1;
            coordinator.observe(|view| select(view))
        })
    }
}

/// A memoized value derived from reads of a tracked graph.
///
/// Cloning a `Computed` creates a new handle to the **same** inner state.
pub struct Computed<T> {
    inner: Rc<RefCell<ComputedInner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Computed")
            .field("cached", &inner.cached)
            .field("dirty", &inner.dirty.get())
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Track `select` over `root` with the default configuration.
    pub fn track(
        store: &Store,
        root: impl Into<Observed>,
        select: impl Fn(&Observed) -> T + 'static,
    ) -> Self {
        Self::with_config(store, root, CoordinatorConfig::default(), select)
    }

    /// Track `select` over `root`. The signal policy is always
    /// [`SignalPolicy::DirtyReadsOnly`].
    pub fn with_config(
        store: &Store,
        root: impl Into<Observed>,
        config: CoordinatorConfig,
        select: impl Fn(&Observed) -> T + 'static,
    ) -> Self {
        let config = config.with_signal_policy(SignalPolicy::DirtyReadsOnly);
        let coordinator = ViewCoordinator::new(store, root, config);

        let dirty = Rc::new(Cell::new(true));
        let dirty_for_sub = Rc::clone(&dirty);
        let subscription = coordinator.subscribe(move |_| dirty_for_sub.set(true));

        Self {
            inner: Rc::new(RefCell::new(ComputedInner {
                coordinator,
                select: Box::new(select),
                cached: None,
                dirty,
                version: 0,
                _subscription: subscription,
            })),
        }
    }

    /// Get the current value, re-running the selector if a relevant write
    /// happened since the last run.
    #[must_use]
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Access the current value by reference without cloning.
    ///
    /// # Panics
    ///
    /// Panics if the closure (or the selector) calls back into the same
    /// `Computed` (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let mut inner = self.inner.borrow_mut();
        f(inner.refresh())
    }

    /// Whether the next `get()` will re-run the selector.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.borrow();
        inner.dirty.get() || inner.cached.is_none()
    }

    /// Force the next `get()` to re-run the selector.
    pub fn invalidate(&self) {
        self.inner.borrow().dirty.set(true);
    }

    /// Current version number. Increments by 1 on each recomputation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{Key, NodeRef};

    fn todo_store() -> (Store, NodeRef) {
        let store = Store::new();
        let todos = NodeRef::array_from([
            NodeRef::record_from([("title", "b1")]),
            NodeRef::record_from([("title", "b2")]),
        ]);
        let root = store.adopt(NodeRef::record_from([
            ("todos", todos.into()),
            ("filter", vigil_core::Value::from("all")),
        ]));
        (store, root)
    }

    fn todos(root: &NodeRef) -> NodeRef {
        root.get(&Key::from("todos"))
            .and_then(vigil_core::Value::into_node)
            .expect("todos array")
    }

    fn first_title(view: &Observed) -> String {
        view.as_view()
            .and_then(|root| root.get("todos").into_view())
            .and_then(|todos| todos.get(Key::Index(0)).into_view())
            .and_then(|todo| todo.get("title").as_str().map(str::to_owned))
            .unwrap_or_default()
    }

    fn count(view: &Observed) -> usize {
        view.as_view()
            .and_then(|root| root.get("todos").into_view())
            .map_or(0, |todos| todos.len())
    }

    #[test]
    fn lazy_then_memoized() {
        let (store, root) = todo_store();
        let calls = Rc::new(Cell::new(0u32));
        let calls_clone = Rc::clone(&calls);
        let title = Computed::track(&store, &root, move |v| {
            calls_clone.set(calls_clone.get() + 1);
            first_title(v)
        });

        assert_eq!(calls.get(), 0);
        assert!(title.is_dirty());
        assert_eq!(title.get(), "b1");
        assert_eq!(title.get(), "b1");
        assert_eq!(calls.get(), 1);
        assert_eq!(title.version(), 1);
    }

    #[test]
    fn relevant_write_recomputes() {
        let (store, root) = todo_store();
        let title = Computed::track(&store, &root, first_title);
        assert_eq!(title.get(), "b1");

        let first = todos(&root)
            .get(&Key::Index(0))
            .and_then(vigil_core::Value::into_node)
            .unwrap();
        first.set("title", "renamed").unwrap();
        assert!(title.is_dirty());
        assert_eq!(title.get(), "renamed");
        assert_eq!(title.version(), 2);
    }

    #[test]
    fn unrelated_write_keeps_cache() {
        let (store, root) = todo_store();
        let title = Computed::track(&store, &root, first_title);
        let _ = title.get();

        root.set("filter", "done").unwrap();
        let second = todos(&root)
            .get(&Key::Index(1))
            .and_then(vigil_core::Value::into_node)
            .unwrap();
        second.set("title", "x").unwrap();

        assert!(!title.is_dirty());
        assert_eq!(title.version(), 1);
    }

    #[test]
    fn push_dirties_length_readers_only() {
        let (store, root) = todo_store();
        let title = Computed::track(&store, &root, first_title);
        let len = Computed::track(&store, &root, count);
        assert_eq!(title.get(), "b1");
        assert_eq!(len.get(), 2);

        todos(&root)
            .push(NodeRef::record_from([("title", "b3")]))
            .unwrap();

        assert!(!title.is_dirty());
        assert!(len.is_dirty());
        assert_eq!(len.get(), 3);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let (store, root) = todo_store();
        let title = Computed::track(&store, &root, first_title);
        let _ = title.get();
        title.invalidate();
        assert!(title.is_dirty());
        let _ = title.get();
        assert_eq!(title.version(), 2);
    }

    #[test]
    fn clone_shares_state() {
        let (store, root) = todo_store();
        let a = Computed::track(&store, &root, count);
        let b = a.clone();
        assert_eq!(a.get(), 2);
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn with_access() {
        let (store, root) = todo_store();
        let title = Computed::track(&store, &root, first_title);
        assert_eq!(title.with(String::len), 2);
    }

    #[test]
    fn survives_store_drop() {
        let computed;
        {
            let (store, root) = todo_store();
            computed = Computed::track(&store, &root, count);
            let _ = computed.get();
        }
        assert_eq!(computed.get(), 2);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn debug_format() {
        let (store, root) = todo_store();
        let len = Computed::track(&store, &root, count);
        let _ = len.get();
        let dbg = format!("{len:?}");
        assert!(dbg.contains("Computed"));
        assert!(dbg.contains('2'));
    }
}
