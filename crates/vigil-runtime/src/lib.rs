#![forbid(unsafe_code)]

//! Runtime: the access/change intersection engine.
//!
//! See [`reactive`] for the moving parts. The graph, store, and snapshot
//! types it runs over live in `vigil-core`.

pub mod reactive;

pub use reactive::{
    AccessChangeTracker, AccessFlags, Computed, CoordinatorConfig, CoordinatorState, DirtySet,
    Observable, Observed, ObservedView, SignalPolicy, StructuralPolicy, Subscription,
    TrackerConfig, TrackingScope, ViewCoordinator, ViewError,
};
