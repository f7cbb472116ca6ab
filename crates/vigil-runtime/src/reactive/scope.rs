#![forbid(unsafe_code)]

//! Tracking scopes: a tracker plus a view cache, shared by every view the
//! scope hands out.
//!
//! [`TrackingScope::observe`] is the factory entry point. Untracked values
//! pass through untouched; tracked nodes come back as the scope's cached
//! view for that node, built on first use. Passing a view from another
//! scope re-observes its underlying node here, so reads made by a child
//! consumer are attributed to the child's scope and not to the parent's.
//!
//! Classification is memoized per node for the duration of one cycle. A
//! node whose classification flips mid-cycle (for example a trackable mark
//! toggled while a render is reading) is passed through untracked for the
//! rest of the cycle and its cached view is dropped. Observing a node as
//! untracked in any cycle also drops its cached view, so a node that later
//! becomes trackable again never gets a view from before the flip.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use vigil_core::{Key, NodeId, NodeRef, Value, classify_node};

use super::config::TrackerConfig;
use super::tracker::{AccessChangeTracker, AccessFlags, DirtySet, TrackerStats};
use super::view::{Observed, ObservedView, ViewInner};
use super::view_cache::{CacheStats, ViewCache};

pub(crate) struct ScopeInner {
    tracker: RefCell<AccessChangeTracker>,
    cache: RefCell<ViewCache>,
    classes: RefCell<AHashMap<NodeId, bool>>,
    passthrough: RefCell<AHashSet<NodeId>>,
}

impl ScopeInner {
    pub(crate) fn record_access(&self, node: &NodeRef, key: &Key) {
        self.tracker.borrow_mut().record_access(node, key);
    }

    pub(crate) fn record_flags(&self, node: &NodeRef, flags: AccessFlags) {
        self.tracker.borrow_mut().record_flags(node, flags);
    }

    pub(crate) fn record_change(&self, node: &NodeRef, key: &Key, structural: bool) {
        self.tracker
            .borrow_mut()
            .record_change(node, key, structural);
    }

    pub(crate) fn has_dirty_read(&self) -> bool {
        self.tracker.borrow_mut().has_dirty_read()
    }

    /// Wrap `value`, reached through `parent` (if any).
    pub(crate) fn observe(this: &Rc<Self>, value: Value, parent: Option<NodeId>) -> Observed {
        let Value::Node(node) = value else {
            return Observed::Value(value);
        };
        let id = node.id();
        if this.passthrough.borrow().contains(&id) {
            return Observed::Value(Value::Node(node));
        }

        let tracked = classify_node(&node).is_tracked();
        let previous = this.classes.borrow_mut().insert(id, tracked);
        if let Some(previous) = previous
            && previous != tracked
        {
            tracing::warn!(
                node = %id,
                was = previous,
                now = tracked,
                "scope.classification_changed"
            );
            this.passthrough.borrow_mut().insert(id);
            this.cache.borrow_mut().discard(id);
            return Observed::Value(Value::Node(node));
        }
        if !tracked {
            this.cache.borrow_mut().discard(id);
            return Observed::Value(Value::Node(node));
        }

        let read_only = node.is_frozen();
        let scope = Rc::downgrade(this);
        let inner = this
            .cache
            .borrow_mut()
            .materialize(&node, read_only, parent, || {
                Rc::new(ViewInner::new(node.clone(), scope, read_only))
            });
        Observed::View(ObservedView::from_inner(inner))
    }
}

/// Combined tracker and cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeStats {
    pub tracker: TrackerStats,
    pub cache: CacheStats,
}

/// A tracker and view cache shared by all views it hands out.
///
/// Cloning a `TrackingScope` creates a new handle to the **same** scope.
#[derive(Clone)]
pub struct TrackingScope {
    inner: Rc<ScopeInner>,
}

impl fmt::Debug for TrackingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingScope")
            .field("tracker", &*self.inner.tracker.borrow())
            .field("cache", &*self.inner.cache.borrow())
            .finish()
    }
}

impl Default for TrackingScope {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl TrackingScope {
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                tracker: RefCell::new(AccessChangeTracker::new(config)),
                cache: RefCell::new(ViewCache::new()),
                classes: RefCell::new(AHashMap::new()),
                passthrough: RefCell::new(AHashSet::new()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<ScopeInner> {
        Rc::downgrade(&self.inner)
    }

    /// Observe a value in this scope.
    ///
    /// A view from another scope is unwrapped to its node first; a view from
    /// this scope is returned as is.
    pub fn observe(&self, value: impl Into<Observed>) -> Observed {
        match value.into() {
            Observed::View(view) if view.belongs_to(&self.inner) => Observed::View(view),
            other => ScopeInner::observe(&self.inner, other.into_raw(), None),
        }
    }

    /// Clear every access record and the per-cycle classification memo.
    pub fn begin_cycle(&self) {
        self.inner.tracker.borrow_mut().begin_cycle();
        self.inner.classes.borrow_mut().clear();
        self.inner.passthrough.borrow_mut().clear();
    }

    /// Compute the dirty set and clear all change records.
    pub fn reconcile(&self) -> DirtySet {
        self.inner.tracker.borrow_mut().reconcile()
    }

    /// Evict the cached views of `dirty` nodes, and of every ancestor on
    /// their access paths when `ancestors` is set. Returns the number of
    /// entries evicted.
    pub fn invalidate(&self, dirty: &DirtySet, ancestors: bool) -> usize {
        let mut cache = self.inner.cache.borrow_mut();
        let evicted: usize = dirty
            .iter()
            .map(|node| {
                if ancestors {
                    cache.evict_with_ancestors(node.id())
                } else {
                    usize::from(cache.evict(node.id()))
                }
            })
            .sum();
        cache.prune_dead();
        evicted
    }

    pub fn record_change(&self, node: &NodeRef, key: &Key, structural: bool) {
        self.inner.record_change(node, key, structural);
    }

    pub fn has_dirty_read(&self) -> bool {
        self.inner.has_dirty_read()
    }

    #[must_use]
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.inner.tracker.borrow().is_dirty(id)
    }

    /// Whether a live view for `id` is cached.
    #[must_use]
    pub fn is_cached(&self, id: NodeId) -> bool {
        self.inner.cache.borrow().contains(id)
    }

    /// Keys read on `id` this cycle, unordered.
    #[must_use]
    pub fn accessed_keys(&self, id: NodeId) -> Vec<Key> {
        self.inner
            .tracker
            .borrow()
            .access_record(id)
            .map(|record| record.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Coarse read flags recorded on `id` this cycle.
    #[must_use]
    pub fn access_flags(&self, id: NodeId) -> AccessFlags {
        self.inner
            .tracker
            .borrow()
            .access_record(id)
            .map(|record| record.flags())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stats(&self) -> ScopeStats {
        ScopeStats {
            tracker: self.inner.tracker.borrow().stats(),
            cache: self.inner.cache.borrow().stats(),
        }
    }
}
