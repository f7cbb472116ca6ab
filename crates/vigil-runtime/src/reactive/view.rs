#![forbid(unsafe_code)]

//! Observing views over graph nodes.
//!
//! An [`ObservedView`] wraps one tracked node and records every read made
//! through it into its tracking scope. Reads that yield another tracked node
//! return that node's view from the same scope, so tracking follows the
//! reader lazily through the graph without ever walking it eagerly.
//!
//! | read                      | recorded as                          |
//! |---------------------------|--------------------------------------|
//! | [`get`](ObservedView::get)               | the key                 |
//! | [`has`](ObservedView::has)               | `HAS` flag              |
//! | [`descriptor`](ObservedView::descriptor) | `DESCRIPTOR` flag + key |
//! | [`keys`](ObservedView::keys)             | `OWN_KEYS` flag         |
//! | [`len`](ObservedView::len)               | `length` (arrays), `OWN_KEYS` (records) |
//!
//! Writes are delegated to the underlying node unless the view is
//! read-only (the node is frozen). Changes are picked up later from the
//! store's notification stream, never from the view.
//!
//! Views hold their scope weakly. Once the owning coordinator is gone,
//! reads through a surviving view still return live data but record
//! nothing and nested values come back unwrapped.

use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;
use vigil_core::{Descriptor, GraphError, Key, NodeId, NodeRef, Value};

use super::scope::ScopeInner;
use super::tracker::AccessFlags;

/// Errors from writes made through a view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("attempted write to read-only view of node {node}")]
    ReadOnly { node: NodeId },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, ViewError>;

pub(crate) struct ViewInner {
    node: NodeRef,
    scope: Weak<ScopeInner>,
    read_only: bool,
}

impl ViewInner {
    pub(crate) fn new(node: NodeRef, scope: Weak<ScopeInner>, read_only: bool) -> Self {
        Self {
            node,
            scope,
            read_only,
        }
    }

    /// A view bound to no scope.
    #[cfg(test)]
    pub(crate) fn detached(node: NodeRef, read_only: bool) -> Self {
        Self::new(node, Weak::new(), read_only)
    }
}

/// A read-recording view over one tracked node.
///
/// Cloning a view yields a handle to the same view; [`ObservedView::ptr_eq`]
/// compares view identity, which is what memoization should key on.
#[derive(Clone)]
pub struct ObservedView {
    inner: Rc<ViewInner>,
}

impl fmt::Debug for ObservedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedView")
            .field("node", &self.inner.node.id())
            .field("read_only", &self.inner.read_only)
            .field("scoped", &(self.inner.scope.strong_count() > 0))
            .finish()
    }
}

impl ObservedView {
    pub(crate) fn from_inner(inner: Rc<ViewInner>) -> Self {
        Self { inner }
    }

    fn node(&self) -> &NodeRef {
        &self.inner.node
    }

    fn record_key(&self, key: &Key) -> Option<Rc<ScopeInner>> {
        let scope = self.inner.scope.upgrade()?;
        scope.record_access(self.node(), key);
        Some(scope)
    }

    fn record_flags(&self, flags: AccessFlags) {
        if let Some(scope) = self.inner.scope.upgrade() {
            scope.record_flags(self.node(), flags);
        }
    }

    /// Read `key`. Missing keys read as [`Value::Null`]; nested tracked
    /// nodes come back as views from the same scope.
    pub fn get(&self, key: impl Into<Key>) -> Observed {
        let key = key.into();
        let value = self.node().get(&key).unwrap_or_default();
        match self.record_key(&key) {
            Some(scope) => ScopeInner::observe(&scope, value, Some(self.id())),
            None => Observed::Value(value),
        }
    }

    /// Whether `key` exists.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.record_flags(AccessFlags::HAS);
        self.node().has(&key.into())
    }

    /// Own-property descriptor for `key`. The value is returned raw.
    pub fn descriptor(&self, key: impl Into<Key>) -> Option<Descriptor> {
        let key = key.into();
        self.record_flags(AccessFlags::DESCRIPTOR);
        self.record_key(&key);
        self.node().descriptor(&key)
    }

    /// Own keys, in order.
    pub fn keys(&self) -> Vec<Key> {
        self.record_flags(AccessFlags::OWN_KEYS);
        self.node().keys()
    }

    /// Array length or record field count.
    pub fn len(&self) -> usize {
        if self.node().is_array() {
            self.record_key(&Key::Length);
        } else {
            self.record_flags(AccessFlags::OWN_KEYS);
        }
        self.node().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerate `(key, value)` pairs; records the enumeration and each key.
    pub fn iter(&self) -> impl Iterator<Item = (Key, Observed)> + '_ {
        self.keys().into_iter().map(move |key| {
            let value = self.get(key.clone());
            (key, value)
        })
    }

    /// Write `key` on the underlying node.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Observed>) -> Result<()> {
        self.writable()?;
        self.node().set(key, value.into().into_raw())?;
        Ok(())
    }

    /// Delete `key` on the underlying node. Returns whether it existed.
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        self.writable()?;
        Ok(self.node().delete(&key.into())?)
    }

    fn writable(&self) -> Result<()> {
        if self.inner.read_only {
            tracing::debug!(node = %self.id(), "view.read_only_write");
            return Err(ViewError::ReadOnly { node: self.id() });
        }
        Ok(())
    }

    /// The exact node this view wraps, untracked. Use it to re-observe the
    /// node under a different scope.
    #[must_use]
    pub fn raw(&self) -> NodeRef {
        self.inner.node.clone()
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.node.id()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Whether the view still records into a live scope.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.inner.scope.strong_count() > 0
    }

    /// View identity.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn belongs_to(&self, scope: &Rc<ScopeInner>) -> bool {
        std::ptr::eq(self.inner.scope.as_ptr(), Rc::as_ptr(scope))
    }
}

/// Result of observing a value: untracked values pass through unchanged,
/// tracked nodes come back as views.
#[derive(Debug, Clone)]
pub enum Observed {
    Value(Value),
    View(ObservedView),
}

impl Default for Observed {
    fn default() -> Self {
        Self::Value(Value::Null)
    }
}

impl Observed {
    #[must_use]
    pub fn as_view(&self) -> Option<&ObservedView> {
        match self {
            Self::View(view) => Some(view),
            Self::Value(_) => None,
        }
    }

    #[must_use]
    pub fn into_view(self) -> Option<ObservedView> {
        match self {
            Self::View(view) => Some(view),
            Self::Value(_) => None,
        }
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::View(_) => None,
        }
    }

    #[must_use]
    pub fn is_view(&self) -> bool {
        matches!(self, Self::View(_))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    /// Strip any view, yielding the underlying value.
    #[must_use]
    pub fn into_raw(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::View(view) => Value::Node(view.raw()),
        }
    }

    /// Identity comparison: views by view identity, values by
    /// [`Value::same_value`].
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::View(a), Self::View(b)) => ObservedView::ptr_eq(a, b),
            (Self::Value(a), Self::Value(b)) => a.same_value(b),
            _ => false,
        }
    }
}

impl From<ObservedView> for Observed {
    fn from(view: ObservedView) -> Self {
        Self::View(view)
    }
}

impl From<&ObservedView> for Observed {
    fn from(view: &ObservedView) -> Self {
        Self::View(view.clone())
    }
}

impl From<Value> for Observed {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<NodeRef> for Observed {
    fn from(node: NodeRef) -> Self {
        Self::Value(Value::Node(node))
    }
}

impl From<&NodeRef> for Observed {
    fn from(node: &NodeRef) -> Self {
        Self::Value(Value::Node(node.clone()))
    }
}

macro_rules! observed_from_primitive {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Observed {
            fn from(v: $ty) -> Self {
                Self::Value(Value::from(v))
            }
        })*
    };
}

observed_from_primitive!(bool, f64, i32, u32, &str, String);
