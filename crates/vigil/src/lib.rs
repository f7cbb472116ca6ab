#![forbid(unsafe_code)]

//! vigil public facade crate.
//!
//! Re-exports the graph and store types from `vigil-core` and, with the
//! `runtime` feature (on by default), the tracking engine from
//! `vigil-runtime`.
//!
//! ```
//! use vigil::prelude::*;
//!
//! let store = Store::new();
//! let root = store.adopt(NodeRef::record_from([("count", 0)]));
//! let coord = ViewCoordinator::with_defaults(&store, &root);
//!
//! let first = coord.observe(|v| {
//!     let view = v.as_view().cloned().unwrap();
//!     assert_eq!(view.get("count").as_f64(), Some(0.0));
//!     view
//! });
//! root.set("count", 1).unwrap();
//! let second = coord.current_view().into_view().unwrap();
//!
//! assert!(!ObservedView::ptr_eq(&first, &second));
//! assert_eq!(second.get("count").as_f64(), Some(1.0));
//! ```

pub use vigil_core as core;
#[cfg(feature = "runtime")]
pub use vigil_runtime as runtime;

pub mod prelude {
    pub use vigil_core::{
        ClassDef, ClassRegistry, GraphError, Key, MutationOp, NodeId, NodeRef, OpKind, Snapshotter,
        Store, StoreSubscription, Value, is_trackable,
    };

    #[cfg(feature = "runtime")]
    pub use vigil_runtime::reactive::{
        AccessFlags, Computed, CoordinatorConfig, CoordinatorState, Observable, Observed,
        ObservedView, SignalPolicy, StructuralPolicy, Subscription, TrackingScope,
        ViewCoordinator, ViewError,
    };
}
