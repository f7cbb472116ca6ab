#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! Defaults are the strict policies: structural changes only dirty
//! enumeration-style reads, dirtiness invalidates the whole ancestor path,
//! and coordinators signal on every delivered change.
//!
//! [`CoordinatorConfig::from_env`] applies these overrides on top of the
//! defaults; values that do not parse are ignored:
//!
//! | variable                      | values                        |
//! |-------------------------------|-------------------------------|
//! | `VIGIL_STRUCTURAL_POLICY`     | `enumeration`, `any-access`   |
//! | `VIGIL_ANCESTOR_INVALIDATION` | `1`, `true`, `0`, `false`     |
//! | `VIGIL_SIGNAL_POLICY`         | `any-change`, `dirty-reads`   |

use std::env;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which reads a structural change (key added or removed) dirties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum StructuralPolicy {
    /// Only reads that asked which keys exist: key enumeration, `has`
    /// checks, descriptor probes.
    #[default]
    EnumerationOnly,
    /// Any read of the node at all.
    AnyAccess,
}

impl FromStr for StructuralPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enumeration" | "enumeration-only" => Ok(Self::EnumerationOnly),
            "any-access" | "any" => Ok(Self::AnyAccess),
            _ => Err(()),
        }
    }
}

/// When a coordinator tells its subscribers that a new view may exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SignalPolicy {
    /// After every delivered mutation batch.
    #[default]
    AnyChange,
    /// Only when the batch intersected something read in the last cycle.
    DirtyReadsOnly,
}

impl FromStr for SignalPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any-change" | "any" => Ok(Self::AnyChange),
            "dirty-reads" | "dirty-reads-only" => Ok(Self::DirtyReadsOnly),
            _ => Err(()),
        }
    }
}

/// Configuration for an [`AccessChangeTracker`](super::tracker::AccessChangeTracker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackerConfig {
    /// Default: [`StructuralPolicy::EnumerationOnly`].
    pub structural_policy: StructuralPolicy,
}

impl TrackerConfig {
    #[must_use]
    pub fn with_structural_policy(mut self, policy: StructuralPolicy) -> Self {
        self.structural_policy = policy;
        self
    }
}

/// Configuration for a [`ViewCoordinator`](super::coordinator::ViewCoordinator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoordinatorConfig {
    pub tracker: TrackerConfig,

    /// Invalidate every cached ancestor on the access paths to a dirty
    /// node, not just the node itself.
    /// Default: true.
    pub ancestor_invalidation: bool,

    /// Default: [`SignalPolicy::AnyChange`].
    pub signal_policy: SignalPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            ancestor_invalidation: true,
            signal_policy: SignalPolicy::AnyChange,
        }
    }
}

impl CoordinatorConfig {
    /// Defaults with `VIGIL_*` environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup("VIGIL_STRUCTURAL_POLICY")
            && let Ok(policy) = val.parse()
        {
            self.tracker.structural_policy = policy;
        }
        if let Some(val) = lookup("VIGIL_ANCESTOR_INVALIDATION") {
            match val.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => self.ancestor_invalidation = true,
                "0" | "false" => self.ancestor_invalidation = false,
                _ => {}
            }
        }
        if let Some(val) = lookup("VIGIL_SIGNAL_POLICY")
            && let Ok(policy) = val.parse()
        {
            self.signal_policy = policy;
        }
        self
    }

    #[must_use]
    pub fn with_structural_policy(mut self, policy: StructuralPolicy) -> Self {
        self.tracker.structural_policy = policy;
        self
    }

    #[must_use]
    pub fn with_ancestor_invalidation(mut self, enabled: bool) -> Self {
        self.ancestor_invalidation = enabled;
        self
    }

    #[must_use]
    pub fn with_signal_policy(mut self, policy: SignalPolicy) -> Self {
        self.signal_policy = policy;
        self
    }
}
