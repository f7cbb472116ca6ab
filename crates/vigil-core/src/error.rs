//! Errors raised by graph mutations.

use thiserror::Error;

use crate::key::Key;
use crate::node::{NodeId, Shape};

/// Result alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// A mutation the graph refused to apply.
///
/// Nothing here is fatal: the node is left exactly as it was before the
/// call and no op is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The node was frozen (snapshot copies are always frozen).
    #[error("node {node} is frozen")]
    Frozen { node: NodeId },

    /// The key kind does not apply to this node shape, e.g. an `Index` on a
    /// record or a direct write to an array's `length`.
    #[error("key `{key}` is not writable on a {shape} node")]
    InvalidKey { key: Key, shape: Shape },

    /// Array write or removal past the end.
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// An array-only operation was called on a record.
    #[error("node {node} is not an array")]
    NotAnArray { node: NodeId },
}
