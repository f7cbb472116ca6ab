#![forbid(unsafe_code)]

//! Core: object graph, mutable store, trackability, and snapshots.
//!
//! The engine in `vigil-runtime` only ever sees the types defined here:
//!
//! - [`NodeRef`]: a shared, identity-compared record or array node.
//! - [`Value`]: what a node slot holds (primitives or another node).
//! - [`Store`]: the mutable-store abstraction. Owns nodes, batches
//!   mutations, and delivers [`MutationOp`] lists to deep subscribers.
//! - [`trackable`]: the predicate deciding which nodes get observed.
//! - [`snapshot`]: the flattening pass that turns class getters into plain
//!   frozen fields before the engine looks at a graph.

pub mod error;
pub mod key;
pub mod logging;
pub mod node;
pub mod snapshot;
pub mod store;
pub mod trackable;
pub mod value;

pub use error::GraphError;
pub use key::Key;
pub use node::{Descriptor, NodeId, NodeRef, Shape, WeakNode};
pub use snapshot::{ClassDef, ClassRegistry, Getter, Snapshotter};
pub use store::{MutationOp, OpKind, Store, StoreSubscription};
pub use trackable::{Trackability, classify, classify_node, is_trackable};
pub use value::Value;
