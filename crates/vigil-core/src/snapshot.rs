//! Immutable snapshots with flattened class getters.
//!
//! The tracking engine only understands plain keyed data. Class instances
//! with computed getters are handled here instead: [`Snapshotter::snapshot`]
//! deep-copies a graph into frozen nodes and, for each instance, walks its
//! class chain once, calls every getter, and stores the result as an ordinary
//! field on the copy.
//!
//! # Invariants
//!
//! 1. Every node of a snapshot is frozen.
//! 2. Within one pass each source node is copied at most once, so cycles and
//!    diamonds in the source reappear in the copy.
//! 3. A source node whose version has not changed since it was last copied
//!    yields the same snapshot node (untouched subtrees keep identity).
//! 4. Own fields shadow getters; a subclass getter shadows a parent getter
//!    of the same name.
//!
//! Getters must be pure functions of the instance's own subtree. A getter
//! that reads unrelated state is not re-run until the instance changes.

use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::key::Key;
use crate::node::{NodeId, NodeRef, Shape, WeakNode};
use crate::value::Value;

#[cfg(feature = "tracing")]
use crate::logging::{trace, warn};
#[cfg(not(feature = "tracing"))]
use crate::{trace, warn};

/// A computed property evaluated against the source instance.
pub type Getter = Rc<dyn Fn(&NodeRef) -> Value>;

/// A class: an optional parent class plus named getters.
#[derive(Clone, Default)]
pub struct ClassDef {
    parent: Option<Rc<str>>,
    getters: Vec<(Rc<str>, Getter)>,
}

impl ClassDef {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inherit getters from `parent`.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<Rc<str>>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add a getter.
    #[must_use]
    pub fn getter(
        mut self,
        name: impl Into<Rc<str>>,
        getter: impl Fn(&NodeRef) -> Value + 'static,
    ) -> Self {
        self.getters.push((name.into(), Rc::new(getter)));
        self
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.getters.iter().map(|(n, _)| &**n).collect();
        f.debug_struct("ClassDef")
            .field("parent", &self.parent)
            .field("getters", &names)
            .finish()
    }
}

/// Class definitions by name.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: AHashMap<Rc<str>, ClassDef>,
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a class.
    pub fn register(&mut self, name: impl Into<Rc<str>>, def: ClassDef) {
        self.classes.insert(name.into(), def);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    /// Getters visible on `class`, most-derived first, shadowed names
    /// dropped. Stops at unknown classes and inheritance loops.
    #[must_use]
    pub fn resolve_getters(&self, class: &str) -> Vec<(Rc<str>, Getter)> {
        let mut out: Vec<(Rc<str>, Getter)> = Vec::new();
        let mut names = AHashSet::new();
        let mut visited = AHashSet::new();
        let mut current = Some(Rc::<str>::from(class));
        while let Some(name) = current.take() {
            if !visited.insert(name.clone()) {
                warn!(class = %name, "snapshot.class_loop");
                break;
            }
            let Some(def) = self.classes.get(&name) else {
                break;
            };
            for (getter_name, getter) in &def.getters {
                if names.insert(getter_name.clone()) {
                    out.push((getter_name.clone(), Rc::clone(getter)));
                }
            }
            current = def.parent.clone();
        }
        out
    }
}

struct CachedSnapshot {
    version: u64,
    source: WeakNode,
    snapshot: NodeRef,
}

/// Builds frozen snapshots, reusing copies of unchanged nodes.
pub struct Snapshotter {
    registry: ClassRegistry,
    cache: AHashMap<NodeId, CachedSnapshot>,
}

impl fmt::Debug for Snapshotter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshotter")
            .field("registry", &self.registry)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Default for Snapshotter {
    fn default() -> Self {
        Self::new(ClassRegistry::default())
    }
}

impl Snapshotter {
    #[must_use]
    pub fn new(registry: ClassRegistry) -> Self {
        Self {
            registry,
            cache: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Snapshot `node` and everything reachable from it.
    pub fn snapshot(&mut self, node: &NodeRef) -> NodeRef {
        let mut pass = AHashMap::new();
        let copy = self.copy(node, &mut pass);
        trace!(source = %node.id(), copied = pass.len(), "snapshot.pass");
        copy
    }

    /// Snapshot a value; primitives pass through.
    pub fn snapshot_value(&mut self, value: &Value) -> Value {
        match value {
            Value::Node(node) => Value::Node(self.snapshot(node)),
            other => other.clone(),
        }
    }

    /// Drop cache entries whose source node is gone.
    pub fn evict_dead(&mut self) {
        self.cache.retain(|_, cached| cached.source.is_alive());
    }

    /// Number of cached node copies.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn copy(&mut self, node: &NodeRef, pass: &mut AHashMap<NodeId, NodeRef>) -> NodeRef {
        if let Some(done) = pass.get(&node.id()) {
            return done.clone();
        }
        if let Some(cached) = self.cache.get(&node.id())
            && cached.version == node.version()
            && cached.source.is_alive()
        {
            pass.insert(node.id(), cached.snapshot.clone());
            return cached.snapshot.clone();
        }

        let copy = match node.shape() {
            Shape::Record => NodeRef::record(),
            Shape::Array => NodeRef::array(),
            Shape::Instance => NodeRef::instance(node.class_name().unwrap_or_default()),
        };
        pass.insert(node.id(), copy.clone());

        for key in node.keys() {
            let value = node.get(&key).unwrap_or_default();
            let value = self.copy_value(value, pass);
            match key {
                Key::Field(name) => copy.append_field(name, value),
                _ => copy.append_item(value),
            }
        }

        if let Some(class) = node.class_name() {
            for (name, getter) in self.registry.resolve_getters(class) {
                if copy.has(&Key::Field(name.clone())) {
                    continue;
                }
                let value = getter(node);
                let value = self.copy_value(value, pass);
                copy.append_field(name, value);
            }
        }

        copy.freeze();
        self.cache.insert(
            node.id(),
            CachedSnapshot {
                version: node.version(),
                source: node.downgrade(),
                snapshot: copy.clone(),
            },
        );
        copy
    }

    fn copy_value(&mut self, value: Value, pass: &mut AHashMap<NodeId, NodeRef>) -> Value {
        match value {
            Value::Node(child) => Value::Node(self.copy(&child, pass)),
            other => other,
        }
    }
}
