#![forbid(unsafe_code)]

//! Observation cycles over one root.
//!
//! A [`ViewCoordinator`] owns a [`TrackingScope`] and a store subscription
//! on its root. Every delivered mutation batch is fed into the scope's
//! change records before subscribers are signalled, so a consumer that
//! pulls a view "on notify" never sees a half-applied batch.
//!
//! # State machine
//!
//! ```text
//!            current_view()                 finish_cycle()
//!   Idle ───────────────────▶ Observing ───────────────────▶ Idle
//!    ▲ │                         │ ▲
//!    │ └── store ops recorded ───┘ └── current_view() again (re-run)
//!    └────── (state unchanged) ──┘
//! ```
//!
//! Every [`current_view`](ViewCoordinator::current_view) call reconciles
//! pending changes against the previous cycle's reads, evicts the cached
//! views of dirty nodes (and of their ancestors when configured), starts a
//! fresh cycle, and hands out the root view. Calling it again before
//! [`finish_cycle`](ViewCoordinator::finish_cycle), as a render pass that
//! runs twice does, simply starts the cycle over.
//!
//! # Ownership
//!
//! The coordinator holds the root view strongly and every other view
//! weakly. The store holds the coordinator's callback weakly and the
//! callback holds the scope weakly, so dropping the coordinator (or calling
//! [`detach`](ViewCoordinator::detach)) stops all bookkeeping at once.

use std::cell::{Cell, RefCell};
use std::fmt;

use vigil_core::{MutationOp, Store, StoreSubscription, Value};

use super::config::{CoordinatorConfig, SignalPolicy};
use super::observable::{Observable, Subscription};
use super::scope::{ScopeStats, TrackingScope};
use super::view::Observed;

/// Where a coordinator is in its observation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoordinatorState {
    /// No cycle in progress; reads from the last cycle are retained.
    #[default]
    Idle,
    /// A cycle was begun and reads are being recorded.
    Observing,
}

/// Coordinator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorStats {
    pub scope: ScopeStats,
    /// Revision published to subscribers.
    pub revision: u64,
    /// Cycles begun through this coordinator.
    pub cycles: u64,
    /// Cache entries evicted by the last reconciliation.
    pub last_evicted: usize,
    /// Whether the store subscription is still live.
    pub attached: bool,
}

/// Drives observation cycles for one root value.
pub struct ViewCoordinator {
    config: CoordinatorConfig,
    scope: TrackingScope,
    root: Value,
    current: RefCell<Option<Observed>>,
    state: Cell<CoordinatorState>,
    revision: Observable<u64>,
    subscription: RefCell<Option<StoreSubscription>>,
    cycles: Cell<u64>,
    last_evicted: Cell<usize>,
}

impl fmt::Debug for ViewCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCoordinator")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("revision", &self.revision.get())
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

impl ViewCoordinator {
    /// Coordinate `root`, subscribing to its mutations through `store`.
    ///
    /// A view from another coordinator is unwrapped to its node, so this
    /// coordinator tracks reads in its own scope. Untracked roots are
    /// accepted and simply passed through by [`current_view`].
    ///
    /// [`current_view`]: ViewCoordinator::current_view
    #[must_use]
    pub fn new(store: &Store, root: impl Into<Observed>, config: CoordinatorConfig) -> Self {
        let root = root.into();
        if let Observed::View(view) = &root {
            tracing::debug!(node = %view.id(), "coordinator.unwrap_foreign_view");
        }
        let root = root.into_raw();
        let scope = TrackingScope::new(config.tracker);
        let revision = Observable::new(0u64);

        let subscription = root.as_node().map(|node| {
            let weak_scope = scope.downgrade();
            let revision = revision.clone();
            let policy = config.signal_policy;
            store.subscribe(node, move |ops: &[MutationOp]| {
                let Some(scope) = weak_scope.upgrade() else {
                    return;
                };
                for op in ops {
                    scope.record_change(&op.node, &op.key, op.structural);
                }
                let signal = match policy {
                    SignalPolicy::AnyChange => true,
                    SignalPolicy::DirtyReadsOnly => scope.has_dirty_read(),
                };
                tracing::debug!(ops = ops.len(), signal, "coordinator.notify");
                if signal {
                    revision.update(|r| *r += 1);
                }
            })
        });

        Self {
            config,
            scope,
            root,
            current: RefCell::new(None),
            state: Cell::new(CoordinatorState::Idle),
            revision,
            subscription: RefCell::new(subscription),
            cycles: Cell::new(0),
            last_evicted: Cell::new(0),
        }
    }

    /// Coordinate `root` with the default configuration.
    #[must_use]
    pub fn with_defaults(store: &Store, root: impl Into<Observed>) -> Self {
        Self::new(store, root, CoordinatorConfig::default())
    }

    /// Reconcile, invalidate, begin a new cycle, and return the root view.
    pub fn current_view(&self) -> Observed {
        let span = tracing::debug_span!(
            "vigil.reconcile",
            dirty = tracing::field::Empty,
            evicted = tracing::field::Empty,
        );
        let _enter = span.enter();

        let dirty = self.scope.reconcile();
        let evicted = self
            .scope
            .invalidate(&dirty, self.config.ancestor_invalidation);
        span.record("dirty", dirty.len() as u64);
        span.record("evicted", evicted as u64);
        self.last_evicted.set(evicted);

        self.scope.begin_cycle();
        self.state.set(CoordinatorState::Observing);
        self.cycles.set(self.cycles.get() + 1);

        let view = self.scope.observe(self.root.clone());
        *self.current.borrow_mut() = Some(view.clone());
        view
    }

    /// The view handed out by the last cycle, if any. Does not start a cycle.
    #[must_use]
    pub fn last_view(&self) -> Option<Observed> {
        self.current.borrow().clone()
    }

    /// End the current cycle. Reads stay recorded for the next diff.
    pub fn finish_cycle(&self) {
        self.state.set(CoordinatorState::Idle);
    }

    /// Run one full cycle: hand `f` the current view, then finish.
    pub fn observe<R>(&self, f: impl FnOnce(&Observed) -> R) -> R {
        let view = self.current_view();
        let result = f(&view);
        self.finish_cycle();
        result
    }

    /// The root value itself, untracked.
    #[must_use]
    pub fn raw_value(&self) -> Value {
        self.root.clone()
    }

    /// Register a callback run whenever a new view may be available.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&u64) + 'static) -> Subscription {
        self.revision.subscribe(callback)
    }

    /// Number of signals sent so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.get()
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.state.get()
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    #[must_use]
    pub fn scope(&self) -> &TrackingScope {
        &self.scope
    }

    /// Stop listening to the store. No further changes are recorded.
    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.borrow_mut().take() {
            subscription.unsubscribe();
            tracing::debug!("coordinator.detach");
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.subscription.borrow().is_some()
    }

    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            scope: self.scope.stats(),
            revision: self.revision.get(),
            cycles: self.cycles.get(),
            last_evicted: self.last_evicted.get(),
            attached: self.is_attached(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
