#![forbid(unsafe_code)]

//! Fine-grained read tracking over a mutable object graph.
//!
//! This module decides, at every observation point, which parts of a
//! previously handed-out view of the graph are stale:
//!
//! - [`TrackingScope`]: the view factory. Wraps tracked nodes in
//!   [`ObservedView`]s that record every read, caching one view per node.
//! - [`AccessChangeTracker`]: per-node "read this cycle" and "written since
//!   the last reconciliation" sets, and the dirty-read check between them.
//! - [`ViewCoordinator`]: drives observation cycles for one root, feeds
//!   store mutations into the tracker, and invalidates exactly the views
//!   whose reads were hit.
//! - [`Observable`] / [`Subscription`]: the signal a coordinator publishes.
//! - [`Computed`]: a memoized selector built on a coordinator.
//!
//! # Architecture
//!
//! Everything is single-threaded and uses `Rc<RefCell<..>>` interiors. Views
//! hold their node strongly and their scope weakly; the view cache holds
//! views weakly; tracker entries hold nodes weakly. Engine bookkeeping
//! therefore never keeps application data alive.
//!
//! # Invariants
//!
//! 1. A node is dirty iff a key read this cycle was written since the last
//!    reconciliation, or it had a structural change and an enumeration-style
//!    read (per [`StructuralPolicy`]).
//! 2. Reading the same untouched subtree in two consecutive cycles yields
//!    the same views; a dirty node's view, and by default every ancestor
//!    view on its access path, is replaced.
//! 3. Untracked values pass through [`TrackingScope::observe`] unchanged.
//! 4. Reading the same key repeatedly in one cycle is the same as reading
//!    it once.
//! 5. Cyclic graphs are read lazily through the cache and never recursed.

pub mod computed;
pub mod config;
pub mod coordinator;
pub mod observable;
pub mod scope;
pub mod tracker;
pub mod view;
pub mod view_cache;

pub use computed::Computed;
pub use config::{CoordinatorConfig, SignalPolicy, StructuralPolicy, TrackerConfig};
pub use coordinator::{CoordinatorState, CoordinatorStats, ViewCoordinator};
pub use observable::{Observable, Subscription};
pub use scope::{ScopeStats, TrackingScope};
pub use tracker::{
    AccessChangeTracker, AccessFlags, AccessRecord, ChangeRecord, DirtySet, TrackerStats,
};
pub use view::{Observed, ObservedView, ViewError};
pub use view_cache::{CacheStats, ViewCache};
