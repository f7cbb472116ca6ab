//! Graph nodes.
//!
//! A [`NodeRef`] is a shared handle to a record, array, or class instance.
//! Identity is the allocation: two handles are the same node iff
//! [`NodeRef::ptr_eq`] holds. Every node carries a process-unique
//! [`NodeId`] for identity-keyed bookkeeping and log correlation.
//!
//! # Invariants
//!
//! 1. A node's shape never changes after construction.
//! 2. Every mutation that changes a slot bumps the version of the node and of
//!    every ancestor reachable through parent back-links, each exactly once.
//! 3. Writes of the same value (`Value::same_value`) are no-ops: no version
//!    bump, no op.
//! 4. For every `Value::Node(child)` stored under `key` in `parent`, `child`
//!    carries one back-link `(parent, key)`. Back-links are weak; dead ones
//!    are pruned lazily.
//! 5. A frozen node rejects every mutation and stays frozen.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::error::{GraphError, Result};
use crate::key::Key;
use crate::store::{OpKind, Store, StoreInner};
use crate::value::Value;

#[cfg(feature = "tracing")]
use crate::logging::trace;
#[cfg(not(feature = "tracing"))]
use crate::trace;

// ─── Node ID generation ──────────────────────────────────────────────────────

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Process-unique node identity. Renders as `#N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─── Shape & descriptors ─────────────────────────────────────────────────────

/// The container kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Plain keyed record.
    Record,
    /// Index-addressed array with a `length`.
    Array,
    /// Keyed record tagged with a class name.
    Instance,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Record => "record",
            Self::Array => "array",
            Self::Instance => "instance",
        })
    }
}

/// Result of an own-property descriptor probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub value: Value,
    pub writable: bool,
    pub enumerable: bool,
}

// ─── Storage ─────────────────────────────────────────────────────────────────

enum Body {
    Fields(Vec<(Rc<str>, Value)>),
    Items(Vec<Value>),
}

struct ParentLink {
    parent: Weak<NodeCell>,
    key: Key,
}

pub(crate) struct NodeCell {
    id: NodeId,
    shape: Shape,
    class: Option<Rc<str>>,
    body: RefCell<Body>,
    mark: Cell<Option<bool>>,
    frozen: Cell<bool>,
    version: Cell<u64>,
    store: RefCell<Weak<StoreInner>>,
    /// Stores holding a subscription rooted here without owning the node.
    watchers: RefCell<SmallVec<[Weak<StoreInner>; 1]>>,
    parents: RefCell<SmallVec<[ParentLink; 2]>>,
}

/// One applied slot change, before it is published as ops.
#[derive(Debug, Clone)]
pub(crate) struct Edit {
    pub(crate) kind: OpKind,
    pub(crate) key: Key,
    pub(crate) old: Option<Value>,
    pub(crate) new: Option<Value>,
    pub(crate) structural: bool,
}

impl Edit {
    fn set(key: Key, old: Option<Value>, new: Value) -> Self {
        let structural = old.is_none();
        Self {
            kind: OpKind::Set,
            key,
            old,
            new: Some(new),
            structural,
        }
    }

    fn delete(key: Key, old: Value) -> Self {
        Self {
            kind: OpKind::Delete,
            key,
            old: Some(old),
            new: None,
            structural: true,
        }
    }

    fn length(old: usize, new: usize) -> Self {
        Self::set(
            Key::Length,
            Some(Value::Number(old as f64)),
            Value::Number(new as f64),
        )
    }
}

pub(crate) type Edits = SmallVec<[Edit; 2]>;

/// Key path from an ancestor down to a mutated node.
pub(crate) type Path = SmallVec<[Key; 4]>;

// ─── NodeRef ─────────────────────────────────────────────────────────────────

/// Shared handle to a graph node.
///
/// Cloning a `NodeRef` creates a new handle to the **same** node.
#[derive(Clone)]
pub struct NodeRef(Rc<NodeCell>);

/// Non-owning handle to a node. Keeps its [`NodeId`] after the node is gone.
#[derive(Clone)]
pub struct WeakNode {
    id: NodeId,
    cell: Weak<NodeCell>,
}

impl NodeRef {
    // ── Constructors ─────────────────────────────────────────────────

    fn with_body(shape: Shape, class: Option<Rc<str>>, body: Body) -> Self {
        Self(Rc::new(NodeCell {
            id: next_node_id(),
            shape,
            class,
            body: RefCell::new(body),
            mark: Cell::new(None),
            frozen: Cell::new(false),
            version: Cell::new(0),
            store: RefCell::new(Weak::new()),
            watchers: RefCell::new(SmallVec::new()),
            parents: RefCell::new(SmallVec::new()),
        }))
    }

    /// Create an empty plain record.
    #[must_use]
    pub fn record() -> Self {
        Self::with_body(Shape::Record, None, Body::Fields(Vec::new()))
    }

    /// Create an empty array.
    #[must_use]
    pub fn array() -> Self {
        Self::with_body(Shape::Array, None, Body::Items(Vec::new()))
    }

    /// Create an empty instance of `class`.
    #[must_use]
    pub fn instance(class: impl Into<Rc<str>>) -> Self {
        Self::with_body(Shape::Instance, Some(class.into()), Body::Fields(Vec::new()))
    }

    /// Create a plain record from `(name, value)` pairs. Later duplicates win.
    #[must_use]
    pub fn record_from<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        let node = Self::record();
        for (name, value) in fields {
            node.append_field(name.into(), value.into());
        }
        node
    }

    /// Create an array from values.
    #[must_use]
    pub fn array_from<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        let node = Self::array();
        for item in items {
            node.append_item(item.into());
        }
        node
    }

    /// Construction-time field write: no version bump, no ops.
    pub(crate) fn append_field(&self, name: Rc<str>, value: Value) {
        let key = Key::Field(name.clone());
        let replaced = {
            let mut body = self.0.body.borrow_mut();
            let Body::Fields(fields) = &mut *body else {
                return;
            };
            match fields.iter_mut().find(|(n, _)| *n == name) {
                Some((_, slot)) => Some(std::mem::replace(slot, value.clone())),
                None => {
                    fields.push((name, value.clone()));
                    None
                }
            }
        };
        if let Some(Value::Node(old)) = replaced {
            old.unlink_parent(self, &key);
        }
        if let Value::Node(child) = &value {
            child.link_parent(self, key);
        }
    }

    /// Construction-time array append: no version bump, no ops.
    pub(crate) fn append_item(&self, value: Value) {
        let index = {
            let mut body = self.0.body.borrow_mut();
            let Body::Items(items) = &mut *body else {
                return;
            };
            items.push(value.clone());
            items.len() - 1
        };
        if let Value::Node(child) = &value {
            child.link_parent(self, Key::Index(index));
        }
    }

    // ── Identity & metadata ──────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.0.id
    }

    /// Whether two handles point at the same node.
    #[inline]
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            id: self.0.id,
            cell: Rc::downgrade(&self.0),
        }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.0.shape
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.shape == Shape::Array
    }

    /// Class name of an instance node.
    #[must_use]
    pub fn class_name(&self) -> Option<&str> {
        self.0.class.as_deref()
    }

    /// Monotonic counter bumped whenever this node or a descendant changes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.0.version.get()
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    /// Freeze the node. Irreversible.
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    /// Explicit trackability override, if any.
    #[must_use]
    pub fn trackable_mark(&self) -> Option<bool> {
        self.0.mark.get()
    }

    /// Mark the node trackable (`true`) or opaque (`false`), overriding the
    /// shape default.
    pub fn mark_trackable(&self, trackable: bool) {
        self.0.mark.set(Some(trackable));
    }

    pub fn clear_trackable_mark(&self) {
        self.0.mark.set(None);
    }

    /// The store that owns this node, if it is still alive.
    #[must_use]
    pub fn store(&self) -> Option<Store> {
        self.store_inner().map(Store::from_inner)
    }

    #[must_use]
    pub fn is_store_owned(&self) -> bool {
        self.0.store.borrow().strong_count() > 0
    }

    pub(crate) fn store_inner(&self) -> Option<Rc<StoreInner>> {
        self.0.store.borrow().upgrade()
    }

    pub(crate) fn set_store(&self, store: &Rc<StoreInner>) {
        *self.0.store.borrow_mut() = Rc::downgrade(store);
    }

    /// Route mutations at or below this node to `store` as well as to the
    /// owner.
    pub(crate) fn add_watcher(&self, store: &Rc<StoreInner>) {
        let mut watchers = self.0.watchers.borrow_mut();
        watchers.retain(|w| w.strong_count() > 0);
        if !watchers.iter().any(|w| w.as_ptr() == Rc::as_ptr(store)) {
            watchers.push(Rc::downgrade(store));
        }
    }

    /// Live `(parent, key)` back-links.
    #[must_use]
    pub fn parents(&self) -> Vec<(NodeRef, Key)> {
        let mut parents = self.0.parents.borrow_mut();
        parents.retain(|link| link.parent.strong_count() > 0);
        parents
            .iter()
            .filter_map(|link| Some((NodeRef(link.parent.upgrade()?), link.key.clone())))
            .collect()
    }

    fn link_parent(&self, parent: &NodeRef, key: Key) {
        self.0.parents.borrow_mut().push(ParentLink {
            parent: Rc::downgrade(&parent.0),
            key,
        });
    }

    fn unlink_parent(&self, parent: &NodeRef, key: &Key) {
        let mut parents = self.0.parents.borrow_mut();
        if let Some(pos) = parents
            .iter()
            .position(|link| link.parent.as_ptr() == Rc::as_ptr(&parent.0) && link.key == *key)
        {
            parents.remove(pos);
        }
    }

    // ── Raw reads ────────────────────────────────────────────────────

    /// Read a slot. Array `Length` reads as a number.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Value> {
        match (&*self.0.body.borrow(), key) {
            (Body::Fields(fields), Key::Field(name)) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            (Body::Items(items), Key::Index(i)) => items.get(*i).cloned(),
            (Body::Items(items), Key::Length) => Some(Value::Number(items.len() as f64)),
            _ => None,
        }
    }

    /// Whether the key exists on the node.
    #[must_use]
    pub fn has(&self, key: &Key) -> bool {
        match (&*self.0.body.borrow(), key) {
            (Body::Fields(fields), Key::Field(name)) => fields.iter().any(|(n, _)| n == name),
            (Body::Items(items), Key::Index(i)) => *i < items.len(),
            (Body::Items(_), Key::Length) => true,
            _ => false,
        }
    }

    /// Own-property descriptor for `key`.
    #[must_use]
    pub fn descriptor(&self, key: &Key) -> Option<Descriptor> {
        let value = self.get(key)?;
        let is_length = matches!(key, Key::Length);
        Some(Descriptor {
            value,
            writable: !self.is_frozen() && !is_length,
            enumerable: !is_length,
        })
    }

    /// Enumerable own keys: fields in insertion order, or array indices.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        match &*self.0.body.borrow() {
            Body::Fields(fields) => fields.iter().map(|(n, _)| Key::Field(n.clone())).collect(),
            Body::Items(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    /// Field count or array length.
    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.0.body.borrow() {
            Body::Fields(fields) => fields.len(),
            Body::Items(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Mutations ────────────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<()> {
        if self.is_frozen() {
            return Err(GraphError::Frozen { node: self.id() });
        }
        Ok(())
    }

    fn ensure_array(&self) -> Result<()> {
        self.ensure_writable()?;
        if !self.is_array() {
            return Err(GraphError::NotAnArray { node: self.id() });
        }
        Ok(())
    }

    fn invalid_key(&self, key: Key) -> GraphError {
        GraphError::InvalidKey {
            key,
            shape: self.shape(),
        }
    }

    /// Write a slot. Creating a field, or writing `Index(len)` on an array,
    /// is a structural change; overwriting an existing slot is not.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.ensure_writable()?;
        let edits = {
            let mut body = self.0.body.borrow_mut();
            match (&mut *body, key) {
                (Body::Fields(fields), Key::Field(name)) => set_field(fields, name, value),
                (Body::Items(items), Key::Index(index)) => set_index(items, index, value)?,
                (_, key) => return Err(self.invalid_key(key)),
            }
        };
        self.commit(edits);
        Ok(())
    }

    /// Remove a key. Returns whether it existed.
    ///
    /// On arrays this splices the slot out, like [`NodeRef::remove`].
    pub fn delete(&self, key: &Key) -> Result<bool> {
        self.ensure_writable()?;
        match key {
            Key::Field(name) if !self.is_array() => {
                let removed = {
                    let mut body = self.0.body.borrow_mut();
                    let Body::Fields(fields) = &mut *body else {
                        return Ok(false);
                    };
                    fields
                        .iter()
                        .position(|(n, _)| n == name)
                        .map(|pos| fields.remove(pos).1)
                };
                let Some(old) = removed else {
                    return Ok(false);
                };
                self.commit(smallvec::smallvec![Edit::delete(key.clone(), old)]);
                Ok(true)
            }
            Key::Index(index) if self.is_array() => {
                if *index >= self.len() {
                    return Ok(false);
                }
                self.remove(*index).map(|_| true)
            }
            other => Err(self.invalid_key(other.clone())),
        }
    }

    /// Append to an array.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        self.ensure_array()?;
        let len = self.len();
        self.set(Key::Index(len), value)
    }

    /// Remove the last array slot.
    pub fn pop(&self) -> Result<Option<Value>> {
        self.ensure_array()?;
        let (popped, len) = {
            let mut body = self.0.body.borrow_mut();
            let Body::Items(items) = &mut *body else {
                return Ok(None);
            };
            (items.pop(), items.len())
        };
        let Some(old) = popped else {
            return Ok(None);
        };
        let mut edits = Edits::new();
        edits.push(Edit::delete(Key::Index(len), old.clone()));
        edits.push(Edit::length(len + 1, len));
        self.commit(edits);
        Ok(Some(old))
    }

    /// Insert into an array at `index`, shifting later slots up.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.ensure_array()?;
        let value = value.into();
        let edits = {
            let mut body = self.0.body.borrow_mut();
            let Body::Items(items) = &mut *body else {
                return Ok(());
            };
            let len = items.len();
            if index > len {
                return Err(GraphError::IndexOutOfBounds { index, len });
            }
            let before = items.clone();
            items.insert(index, value);
            let mut edits = shifted_edits(&before, items, index..len);
            edits.push(Edit::set(Key::Index(len), None, items[len].clone()));
            edits.push(Edit::length(len, len + 1));
            edits
        };
        self.commit(edits);
        Ok(())
    }

    /// Remove the array slot at `index`, shifting later slots down.
    pub fn remove(&self, index: usize) -> Result<Value> {
        self.ensure_array()?;
        let (removed, edits) = {
            let mut body = self.0.body.borrow_mut();
            let Body::Items(items) = &mut *body else {
                return Err(GraphError::NotAnArray { node: self.id() });
            };
            let len = items.len();
            if index >= len {
                return Err(GraphError::IndexOutOfBounds { index, len });
            }
            let before = items.clone();
            let removed = items.remove(index);
            let mut edits = shifted_edits(&before, items, index..len - 1);
            edits.push(Edit::delete(Key::Index(len - 1), before[len - 1].clone()));
            edits.push(Edit::length(len, len - 1));
            (removed, edits)
        };
        self.commit(edits);
        Ok(removed)
    }

    /// Re-link children, bump versions up the ancestry, and hand the edits to
    /// every store that owns or watches a node on the ancestry.
    fn commit(&self, edits: Edits) {
        if edits.is_empty() {
            return;
        }
        let store = self.store_inner();
        for edit in &edits {
            if let Some(Value::Node(old)) = &edit.old {
                old.unlink_parent(self, &edit.key);
            }
            if let Some(Value::Node(new)) = &edit.new {
                new.link_parent(self, edit.key.clone());
                if let Some(store) = &store {
                    store.adopt_subgraph(new);
                }
            }
        }
        let ancestry = self.bump_ancestry();
        let stores = delivery_stores(&ancestry);
        trace!(
            node = %self.id(),
            edits = edits.len(),
            ancestors = ancestry.len(),
            stores = stores.len(),
            "graph.commit"
        );
        for store in &stores {
            store.enqueue(self, &ancestry, &edits);
        }
        for store in &stores {
            store.flush();
        }
    }

    /// Bump the version of this node and every live ancestor, once each.
    ///
    /// Returns every visited node with its key path down to `self`, in
    /// breadth-first order (so each path is a shortest one).
    fn bump_ancestry(&self) -> Vec<(NodeRef, Path)> {
        let mut seen = AHashSet::new();
        seen.insert(self.id());
        let mut visited = vec![(self.clone(), Path::new())];
        let mut cursor = 0;
        while cursor < visited.len() {
            let (node, path) = visited[cursor].clone();
            node.0.version.set(node.0.version.get() + 1);
            for (parent, key) in node.parents() {
                if seen.insert(parent.id()) {
                    let mut parent_path = Path::with_capacity(path.len() + 1);
                    parent_path.push(key);
                    parent_path.extend(path.iter().cloned());
                    visited.push((parent, parent_path));
                }
            }
            cursor += 1;
        }
        visited
    }

    /// Child nodes held directly in this node's slots.
    pub(crate) fn child_nodes(&self) -> Vec<NodeRef> {
        match &*self.0.body.borrow() {
            Body::Fields(fields) => fields.iter().filter_map(|(_, v)| v.as_node().cloned()).collect(),
            Body::Items(items) => items.iter().filter_map(|v| v.as_node().cloned()).collect(),
        }
    }
}

fn set_field(fields: &mut Vec<(Rc<str>, Value)>, name: Rc<str>, value: Value) -> Edits {
    let mut edits = Edits::new();
    match fields.iter_mut().find(|(n, _)| *n == name) {
        Some((_, slot)) => {
            if !slot.same_value(&value) {
                let old = std::mem::replace(slot, value.clone());
                edits.push(Edit::set(Key::Field(name), Some(old), value));
            }
        }
        None => {
            fields.push((name.clone(), value.clone()));
            edits.push(Edit::set(Key::Field(name), None, value));
        }
    }
    edits
}

fn set_index(items: &mut Vec<Value>, index: usize, value: Value) -> Result<Edits> {
    let len = items.len();
    let mut edits = Edits::new();
    if index < len {
        if !items[index].same_value(&value) {
            let old = std::mem::replace(&mut items[index], value.clone());
            edits.push(Edit::set(Key::Index(index), Some(old), value));
        }
    } else if index == len {
        items.push(value.clone());
        edits.push(Edit::set(Key::Index(index), None, value));
        edits.push(Edit::length(len, len + 1));
    } else {
        return Err(GraphError::IndexOutOfBounds { index, len });
    }
    Ok(edits)
}

/// Every live store that may hold a subscription rooted somewhere in
/// `ancestry`: each node's owner plus the stores watching it.
fn delivery_stores(ancestry: &[(NodeRef, Path)]) -> SmallVec<[Rc<StoreInner>; 2]> {
    let mut stores: SmallVec<[Rc<StoreInner>; 2]> = SmallVec::new();
    for (node, _) in ancestry {
        let watchers = node.0.watchers.borrow();
        let owner = node.store_inner();
        for store in owner.into_iter().chain(watchers.iter().filter_map(Weak::upgrade)) {
            if !stores.iter().any(|s| Rc::ptr_eq(s, &store)) {
                stores.push(store);
            }
        }
    }
    stores
}

/// Non-structural edits for slots whose contents moved during a splice.
fn shifted_edits(before: &[Value], after: &[Value], range: std::ops::Range<usize>) -> Edits {
    range
        .filter(|&j| !before[j].same_value(&after[j]))
        .map(|j| Edit::set(Key::Index(j), Some(before[j].clone()), after[j].clone()))
        .collect()
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never recurse into slots: graphs may be cyclic.
        f.debug_struct("NodeRef")
            .field("id", &self.id())
            .field("shape", &self.shape())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl WeakNode {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<NodeRef> {
        self.cell.upgrade().map(NodeRef)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.cell.strong_count() > 0
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakNode")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
