#![forbid(unsafe_code)]

//! Access/change bookkeeping and dirty-read detection.
//!
//! # Design
//!
//! [`AccessChangeTracker`] keeps, per node, an [`AccessRecord`] (what was
//! read this cycle) and a [`ChangeRecord`] (what was written since the last
//! reconciliation). Entries are keyed by [`NodeId`] and hold the node weakly,
//! so bookkeeping never keeps a node alive.
//!
//! A node is **dirty** iff
//!
//! ```text
//! (change.structural AND structural_policy sees access)
//!     OR (access.keys ∩ change.keys ≠ ∅)
//! ```
//!
//! where the default policy only lets enumeration-style reads (own keys,
//! `has`, descriptor) see structural changes.
//!
//! # Short-circuit
//!
//! Recomputing the intersection on every observation is wasteful. The
//! tracker counts *new* accesses and *new* changes and only recomputes when
//! there are strictly more changes than at the last check, or strictly more
//! accesses and at least one change has ever been recorded. Otherwise the
//! last answer is reused. Clearing either side ([`begin_cycle`],
//! [`reconcile`]) can only remove dirtiness, so both reset the cached answer
//! to `false`; the result is always exact.
//!
//! # Invariants
//!
//! 1. Recording the same key twice in one cycle is a no-op (set union).
//! 2. [`begin_cycle`] clears access records and nothing else.
//! 3. [`reconcile`] clears change records and nothing else.
//! 4. `has_dirty_read()` equals "some entry is dirty" at every point.
//!
//! [`begin_cycle`]: AccessChangeTracker::begin_cycle
//! [`reconcile`]: AccessChangeTracker::reconcile

use std::fmt;

use ahash::{AHashMap, AHashSet};
use bitflags::bitflags;
use vigil_core::{Key, NodeId, NodeRef, WeakNode};

use super::config::{StructuralPolicy, TrackerConfig};

bitflags! {
    /// Coarse, key-independent read flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u8 {
        /// The node's key list was read.
        const OWN_KEYS = 1 << 0;
        /// A `has` check was made for some key.
        const HAS = 1 << 1;
        /// A descriptor probe was made for some key.
        const DESCRIPTOR = 1 << 2;
    }
}

/// Reads recorded on one node during the current cycle.
#[derive(Debug, Clone, Default)]
pub struct AccessRecord {
    keys: AHashSet<Key>,
    flags: AccessFlags,
}

impl AccessRecord {
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    #[must_use]
    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.flags.is_empty()
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.flags = AccessFlags::empty();
    }
}

/// Writes recorded on one node since the last reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ChangeRecord {
    keys: AHashSet<Key>,
    structural: bool,
}

impl ChangeRecord {
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Whether some key was added or removed.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        self.structural
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && !self.structural
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.structural = false;
    }
}

struct NodeEntry {
    node: WeakNode,
    access: AccessRecord,
    change: ChangeRecord,
}

impl NodeEntry {
    fn new(node: &NodeRef) -> Self {
        Self {
            node: node.downgrade(),
            access: AccessRecord::default(),
            change: ChangeRecord::default(),
        }
    }

    fn is_dirty(&self, policy: StructuralPolicy) -> bool {
        let (access, change) = (&self.access, &self.change);
        if access.is_empty() || change.is_empty() {
            return false;
        }
        if change.structural {
            let sees_structure = match policy {
                StructuralPolicy::EnumerationOnly => !access.flags.is_empty(),
                StructuralPolicy::AnyAccess => true,
            };
            if sees_structure {
                return true;
            }
        }
        let (small, large) = if access.keys.len() <= change.keys.len() {
            (&access.keys, &change.keys)
        } else {
            (&change.keys, &access.keys)
        };
        small.iter().any(|key| large.contains(key))
    }
}

/// The set of nodes a reconciliation judged dirty.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    nodes: Vec<NodeRef>,
}

impl DirtySet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|node| node.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter()
    }

    /// Dirty node ids, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(NodeRef::id).collect();
        ids.sort_unstable();
        ids
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerStats {
    /// Nodes with an entry (live or awaiting pruning).
    pub tracked_nodes: usize,
    /// Distinct accesses recorded, ever.
    pub accesses: u64,
    /// Distinct changes recorded, ever.
    pub changes: u64,
    /// Whether any change was ever recorded.
    pub has_any_change: bool,
    /// Cycles begun.
    pub cycles: u64,
    /// Reconciliations run.
    pub reconciliations: u64,
    /// Dirty checks that actually recomputed the intersection.
    pub recomputations: u64,
}

/// Per-node read and write bookkeeping for one tracking scope.
pub struct AccessChangeTracker {
    config: TrackerConfig,
    entries: AHashMap<NodeId, NodeEntry>,
    access_count: u64,
    change_count: u64,
    checked_accesses: u64,
    checked_changes: u64,
    has_any_change: bool,
    dirty_cached: bool,
    cycles: u64,
    reconciliations: u64,
    recomputations: u64,
}

impl fmt::Debug for AccessChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessChangeTracker")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("access_count", &self.access_count)
            .field("change_count", &self.change_count)
            .field("dirty_cached", &self.dirty_cached)
            .finish()
    }
}

impl Default for AccessChangeTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl AccessChangeTracker {
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            entries: AHashMap::new(),
            access_count: 0,
            change_count: 0,
            checked_accesses: 0,
            checked_changes: 0,
            has_any_change: false,
            dirty_cached: false,
            cycles: 0,
            reconciliations: 0,
            recomputations: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn entry(&mut self, node: &NodeRef) -> &mut NodeEntry {
        self.entries
            .entry(node.id())
            .or_insert_with(|| NodeEntry::new(node))
    }

    /// Record a keyed read of `node`.
    pub fn record_access(&mut self, node: &NodeRef, key: &Key) {
        if self.entry(node).access.keys.insert(key.clone()) {
            self.access_count += 1;
            tracing::trace!(node = %node.id(), %key, "tracker.access");
        }
    }

    /// Record a coarse read of `node`.
    pub fn record_flags(&mut self, node: &NodeRef, flags: AccessFlags) {
        let access = &mut self.entry(node).access;
        if !access.flags.contains(flags) {
            access.flags |= flags;
            self.access_count += 1;
            tracing::trace!(node = %node.id(), ?flags, "tracker.access_flags");
        }
    }

    /// Record a write of `key` on `node`.
    pub fn record_change(&mut self, node: &NodeRef, key: &Key, structural: bool) {
        let change = &mut self.entry(node).change;
        let mut grew = change.keys.insert(key.clone());
        if structural && !change.structural {
            change.structural = true;
            grew = true;
        }
        self.has_any_change = true;
        if grew {
            self.change_count += 1;
            tracing::trace!(node = %node.id(), %key, structural, "tracker.change");
        }
    }

    /// Whether `id` currently has a dirty read.
    #[must_use]
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.is_dirty(self.config.structural_policy))
    }

    /// Whether any node has a dirty read. Reuses the previous answer unless
    /// something new could have changed it.
    pub fn has_dirty_read(&mut self) -> bool {
        let new_changes = self.change_count > self.checked_changes;
        let new_accesses = self.access_count > self.checked_accesses;
        if new_changes || (new_accesses && self.has_any_change) {
            let policy = self.config.structural_policy;
            self.dirty_cached = self.entries.values().any(|entry| entry.is_dirty(policy));
            self.recomputations += 1;
        }
        self.checked_changes = self.change_count;
        self.checked_accesses = self.access_count;
        self.dirty_cached
    }

    /// Start a new read cycle: clear every access record (entries are kept
    /// for reuse) and drop entries of nodes that no longer exist.
    pub fn begin_cycle(&mut self) {
        self.entries.retain(|_, entry| entry.node.is_alive());
        for entry in self.entries.values_mut() {
            entry.access.clear();
        }
        self.dirty_cached = false;
        self.checked_accesses = self.access_count;
        self.cycles += 1;
    }

    /// Judge every node with pending changes, clear those changes, and
    /// return the dirty ones.
    pub fn reconcile(&mut self) -> DirtySet {
        let mut dirty = DirtySet::default();
        if self.has_dirty_read() {
            let policy = self.config.structural_policy;
            dirty.nodes = self
                .entries
                .values()
                .filter(|entry| entry.is_dirty(policy))
                .filter_map(|entry| entry.node.upgrade())
                .collect();
        }
        self.entries.retain(|_, entry| {
            entry.change.clear();
            entry.node.is_alive()
        });
        self.dirty_cached = false;
        self.checked_changes = self.change_count;
        self.reconciliations += 1;
        dirty
    }

    /// Access record for `id`, if one exists.
    #[must_use]
    pub fn access_record(&self, id: NodeId) -> Option<&AccessRecord> {
        self.entries.get(&id).map(|entry| &entry.access)
    }

    /// Change record for `id`, if one exists.
    #[must_use]
    pub fn change_record(&self, id: NodeId) -> Option<&ChangeRecord> {
        self.entries.get(&id).map(|entry| &entry.change)
    }

    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            tracked_nodes: self.entries.len(),
            accesses: self.access_count,
            changes: self.change_count,
            has_any_change: self.has_any_change,
            cycles: self.cycles,
            reconciliations: self.reconciliations,
            recomputations: self.recomputations,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
