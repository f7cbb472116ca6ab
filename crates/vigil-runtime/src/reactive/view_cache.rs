#![forbid(unsafe_code)]

//! Identity-keyed cache of materialized views.
//!
//! One entry per node that has been observed through a scope. An entry holds
//! its view *weakly*: the cache alone never keeps a view (or the node it
//! wraps) alive, and a view the application dropped is simply rebuilt on the
//! next read, exactly as if it had been evicted.
//!
//! Each entry also remembers the parent nodes through which its view was
//! reached. [`ViewCache::evict_with_ancestors`] walks these edges so that a
//! change deep in the graph gives every view on the access path back to the
//! root a new identity. The edges outlive the view itself (they are only
//! dropped on eviction or when the node dies), so an intermediate view the
//! application let go of does not cut the path.

use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use vigil_core::{NodeId, NodeRef, WeakNode};

use super::view::ViewInner;

struct CacheEntry {
    node: WeakNode,
    view: Weak<ViewInner>,
    read_only: bool,
    parents: SmallVec<[NodeId; 2]>,
}

impl CacheEntry {
    fn link(&mut self, parent: Option<NodeId>) {
        if let Some(parent) = parent
            && !self.parents.contains(&parent)
        {
            self.parents.push(parent);
        }
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Entries discarded or rebuilt because the node's classification or
    /// read-only status changed.
    pub rebuilds: u64,
}

/// Node id → weakly held view, plus parent edges.
#[derive(Default)]
pub struct ViewCache {
    entries: AHashMap<NodeId, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    rebuilds: u64,
}

impl std::fmt::Debug for ViewCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl ViewCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached view for `node`, building one with `build` if the
    /// entry is missing, its view was dropped, or its read-only status no
    /// longer matches. `parent` (if any) is recorded as an access edge.
    pub(crate) fn materialize(
        &mut self,
        node: &NodeRef,
        read_only: bool,
        parent: Option<NodeId>,
        build: impl FnOnce() -> Rc<ViewInner>,
    ) -> Rc<ViewInner> {
        let id = node.id();
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.read_only != read_only {
                self.rebuilds += 1;
                entry.parents.clear();
                entry.view = Weak::new();
                entry.read_only = read_only;
            }
            entry.link(parent);
            if let Some(view) = entry.view.upgrade() {
                self.hits += 1;
                return view;
            }
            let view = build();
            entry.view = Rc::downgrade(&view);
            self.misses += 1;
            return view;
        }

        let view = build();
        let mut entry = CacheEntry {
            node: node.downgrade(),
            view: Rc::downgrade(&view),
            read_only,
            parents: SmallVec::new(),
        };
        entry.link(parent);
        self.entries.insert(id, entry);
        self.misses += 1;
        view
    }

    /// Whether `id` has an entry whose view is still alive.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.view.strong_count() > 0)
    }

    /// Recorded parent edges of `id`.
    #[must_use]
    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        self.entries
            .get(&id)
            .map_or(&[], |entry| entry.parents.as_slice())
    }

    /// Remove the entry for `id`. Returns whether one existed.
    pub fn evict(&mut self, id: NodeId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            self.evictions += 1;
        }
        removed
    }

    /// Drop the entry for `id` because its node is no longer tracked, so a
    /// later tracked observation builds a fresh view. Returns whether one
    /// existed.
    pub fn discard(&mut self, id: NodeId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            self.rebuilds += 1;
        }
        removed
    }

    /// Remove the entry for `id` and, transitively, the entries of every
    /// parent it was reached through. Returns the number of entries removed.
    pub fn evict_with_ancestors(&mut self, id: NodeId) -> usize {
        let mut stack = vec![id];
        let mut seen = AHashSet::new();
        let mut removed = 0;
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = self.entries.remove(&id) {
                removed += 1;
                stack.extend(entry.parents);
            }
        }
        self.evictions += removed as u64;
        removed
    }

    /// Drop entries whose node no longer exists.
    pub fn prune_dead(&mut self) {
        self.entries.retain(|_, entry| entry.node.is_alive());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            rebuilds: self.rebuilds,
        }
    }
}
