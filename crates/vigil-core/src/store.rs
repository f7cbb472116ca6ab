//! The mutable store.
//!
//! A [`Store`] owns nodes, groups their mutations into batches, and delivers
//! each batch as a list of [`MutationOp`]s to deep subscribers.
//!
//! # Delivery contract
//!
//! 1. Ops reach a subscriber in the order the graph applied them.
//! 2. A subscriber registered on node `N` sees every op on `N` and on any
//!    node below `N`, exactly once per op, with `path` running from `N` down
//!    to the mutated key.
//! 3. Ops are delivered after the outermost [`Store::batch`] closes. A
//!    mutation outside a batch is a batch of its own; array operations that
//!    decompose into several ops are always delivered together.
//! 4. Mutations made by a callback during delivery are queued and delivered
//!    in a following round, never re-entrantly.
//! 5. Subscriber callbacks are held weakly. Dropping the
//!    [`StoreSubscription`] stops delivery before the next batch.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::key::{Key, display_path};
use crate::node::{Edit, NodeId, NodeRef, Path};
use crate::trackable;
use crate::value::Value;

#[cfg(feature = "tracing")]
use crate::logging::debug;
#[cfg(not(feature = "tracing"))]
use crate::debug;

/// What a mutation did to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Set,
    Delete,
}

/// A single low-level mutation, as seen by one subscriber.
#[derive(Debug, Clone)]
pub struct MutationOp {
    pub kind: OpKind,
    /// The node whose slot changed.
    pub node: NodeRef,
    /// The slot that changed on `node`.
    pub key: Key,
    /// Keys from the subscribed node down to `key` (ends with `key`).
    pub path: SmallVec<[Key; 4]>,
    /// The key was created or removed, not merely overwritten.
    pub structural: bool,
    /// Value after the op (`None` for deletes).
    pub value: Option<Value>,
    /// Value before the op (`None` when the key was created).
    pub previous: Option<Value>,
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            OpKind::Set => "set",
            OpKind::Delete => "delete",
        };
        write!(f, "{kind} {}", display_path(&self.path))?;
        if self.structural {
            f.write_str(" (structural)")?;
        }
        Ok(())
    }
}

type Callback = dyn Fn(&[MutationOp]);

struct SubscriberSlot {
    id: u64,
    root: NodeId,
    callback: Weak<Callback>,
}

pub(crate) struct StoreInner {
    subscribers: RefCell<Vec<SubscriberSlot>>,
    pending: RefCell<Vec<(u64, MutationOp)>>,
    batch_depth: Cell<u32>,
    delivering: Cell<bool>,
    next_subscriber: Cell<u64>,
}

/// Shared handle to a mutable store.
///
/// Cloning a `Store` creates a new handle to the **same** store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .field("batch_depth", &self.inner.batch_depth.get())
            .finish()
    }
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                subscribers: RefCell::new(Vec::new()),
                pending: RefCell::new(Vec::new()),
                batch_depth: Cell::new(0),
                delivering: Cell::new(false),
                next_subscriber: Cell::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<StoreInner>) -> Self {
        Self { inner }
    }

    /// Create a store-owned record.
    #[must_use]
    pub fn record(&self) -> NodeRef {
        self.adopt(NodeRef::record())
    }

    /// Create a store-owned array.
    #[must_use]
    pub fn array(&self) -> NodeRef {
        self.adopt(NodeRef::array())
    }

    /// Create a store-owned class instance.
    #[must_use]
    pub fn instance(&self, class: &str) -> NodeRef {
        self.adopt(NodeRef::instance(class))
    }

    /// Take ownership of `node` and every unowned node reachable from it.
    ///
    /// Nodes already owned by another live store are left alone.
    pub fn adopt(&self, node: NodeRef) -> NodeRef {
        self.inner.adopt_subgraph(&node);
        node
    }

    /// Whether this store owns `node`.
    #[must_use]
    pub fn owns(&self, node: &NodeRef) -> bool {
        node.store_inner()
            .is_some_and(|inner| Rc::ptr_eq(&inner, &self.inner))
    }

    /// Trackability predicate: see [`trackable::classify`].
    #[must_use]
    pub fn is_trackable(&self, value: &Value) -> bool {
        trackable::is_trackable(value)
    }

    /// Subscribe to every mutation on `node` or below it.
    ///
    /// The callback runs synchronously once per batch with that batch's ops.
    /// `node` need not be owned by this store: mutations of unowned nodes and
    /// of nodes owned by another store are still delivered, through this
    /// store's batching. Ownership is not changed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(
        &self,
        node: &NodeRef,
        callback: impl Fn(&[MutationOp]) + 'static,
    ) -> StoreSubscription {
        if !self.owns(node) {
            node.add_watcher(&self.inner);
        }
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        let callback: Rc<Callback> = Rc::new(callback);
        self.inner.subscribers.borrow_mut().push(SubscriberSlot {
            id,
            root: node.id(),
            callback: Rc::downgrade(&callback),
        });
        debug!(subscriber = id, root = %node.id(), "store.subscribe");
        StoreSubscription {
            id,
            store: Rc::downgrade(&self.inner),
            _callback: callback,
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .filter(|slot| slot.callback.strong_count() > 0)
            .count()
    }

    /// Run `f` as one batch: ops are delivered once, after the outermost
    /// batch closes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            let _guard = BatchGuard::enter(&self.inner);
            f()
        };
        self.inner.flush();
        result
    }

    /// Whether a batch is currently open.
    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }
}

impl StoreInner {
    pub(crate) fn adopt_subgraph(self: &Rc<Self>, root: &NodeRef) {
        let mut seen = AHashSet::new();
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.id()) {
                continue;
            }
            match node.store_inner() {
                Some(owner) if !Rc::ptr_eq(&owner, self) => continue,
                Some(_) => {}
                None => node.set_store(self),
            }
            stack.extend(node.child_nodes());
        }
    }

    /// Queue `edits` on `node` for every subscriber rooted at a node in
    /// `ancestry` (which includes `node` itself with an empty path).
    pub(crate) fn enqueue(&self, node: &NodeRef, ancestry: &[(NodeRef, Path)], edits: &[Edit]) {
        let roots: SmallVec<[(u64, NodeId); 4]> = self
            .subscribers
            .borrow()
            .iter()
            .filter(|slot| slot.callback.strong_count() > 0)
            .map(|slot| (slot.id, slot.root))
            .collect();
        if roots.is_empty() {
            return;
        }
        let mut pending = self.pending.borrow_mut();
        for edit in edits {
            for (ancestor, path) in ancestry {
                for &(id, _) in roots.iter().filter(|(_, root)| *root == ancestor.id()) {
                    let mut op_path = path.clone();
                    op_path.push(edit.key.clone());
                    pending.push((
                        id,
                        MutationOp {
                            kind: edit.kind,
                            node: node.clone(),
                            key: edit.key.clone(),
                            path: op_path,
                            structural: edit.structural,
                            value: edit.new.clone(),
                            previous: edit.old.clone(),
                        },
                    ));
                }
            }
        }
    }

    /// Deliver queued ops unless a batch is open or delivery is already
    /// running further up the stack.
    pub(crate) fn flush(&self) {
        if self.batch_depth.get() > 0 || self.delivering.get() {
            return;
        }
        let _delivery = DeliveryGuard::enter(self);
        loop {
            let pending = std::mem::take(&mut *self.pending.borrow_mut());
            if pending.is_empty() {
                break;
            }
            let mut groups: Vec<(u64, Vec<MutationOp>)> = Vec::new();
            for (id, op) in pending {
                match groups.iter_mut().find(|(g, _)| *g == id) {
                    Some((_, ops)) => ops.push(op),
                    None => groups.push((id, vec![op])),
                }
            }
            for (id, ops) in groups {
                let callback = self
                    .subscribers
                    .borrow()
                    .iter()
                    .find(|slot| slot.id == id)
                    .and_then(|slot| slot.callback.upgrade());
                if let Some(callback) = callback {
                    debug!(subscriber = id, ops = ops.len(), "store.deliver");
                    callback(&ops);
                }
            }
            self.subscribers
                .borrow_mut()
                .retain(|slot| slot.callback.strong_count() > 0);
        }
    }
}

struct BatchGuard<'a> {
    inner: &'a StoreInner,
}

impl<'a> BatchGuard<'a> {
    fn enter(inner: &'a StoreInner) -> Self {
        inner.batch_depth.set(inner.batch_depth.get() + 1);
        Self { inner }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.inner.batch_depth.set(self.inner.batch_depth.get() - 1);
    }
}

struct DeliveryGuard<'a> {
    inner: &'a StoreInner,
}

impl<'a> DeliveryGuard<'a> {
    fn enter(inner: &'a StoreInner) -> Self {
        inner.delivering.set(true);
        Self { inner }
    }
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.inner.delivering.set(false);
    }
}

/// RAII guard for a store subscription. Dropping it unsubscribes.
pub struct StoreSubscription {
    id: u64,
    store: Weak<StoreInner>,
    _callback: Rc<Callback>,
}

impl StoreSubscription {
    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        if let Ok(mut subscribers) = store.subscribers.try_borrow_mut() {
            subscribers.retain(|slot| slot.id != self.id);
        }
        debug!(subscriber = self.id, "store.unsubscribe");
    }
}
