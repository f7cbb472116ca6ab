//! Which values the engine observes.
//!
//! Classification order, first match wins:
//!
//! 1. Primitives are never tracked.
//! 2. Store-owned nodes are always tracked.
//! 3. An explicit mark ([`NodeRef::mark_trackable`]) decides.
//! 4. Plain records and arrays are tracked; class instances are not.

use crate::node::{NodeRef, Shape};
use crate::value::Value;

/// Why a value is (or is not) tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trackability {
    Primitive,
    StoreOwned,
    MarkedTrackable,
    MarkedOpaque,
    PlainData,
    ClassInstance,
}

impl Trackability {
    #[must_use]
    pub const fn is_tracked(self) -> bool {
        matches!(
            self,
            Self::StoreOwned | Self::MarkedTrackable | Self::PlainData
        )
    }
}

/// Classify a value.
#[must_use]
pub fn classify(value: &Value) -> Trackability {
    match value {
        Value::Node(node) => classify_node(node),
        _ => Trackability::Primitive,
    }
}

/// Classify a node.
#[must_use]
pub fn classify_node(node: &NodeRef) -> Trackability {
    if node.is_store_owned() {
        return Trackability::StoreOwned;
    }
    match node.trackable_mark() {
        Some(true) => Trackability::MarkedTrackable,
        Some(false) => Trackability::MarkedOpaque,
        None => match node.shape() {
            Shape::Record | Shape::Array => Trackability::PlainData,
            Shape::Instance => Trackability::ClassInstance,
        },
    }
}

/// Whether the engine should observe `value`.
#[must_use]
pub fn is_trackable(value: &Value) -> bool {
    classify(value).is_tracked()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn primitives_are_untracked() {
        assert_eq!(classify(&Value::from(1)), Trackability::Primitive);
        assert!(!is_trackable(&Value::from("x")));
        assert!(!is_trackable(&Value::Null));
    }

    #[test]
    fn plain_data_tracked_by_default() {
        assert!(is_trackable(&Value::from(NodeRef::record())));
        assert!(is_trackable(&Value::from(NodeRef::array())));
        assert_eq!(
            classify(&Value::from(NodeRef::instance("Clock"))),
            Trackability::ClassInstance
        );
    }

    #[test]
    fn marks_override_shape_default() {
        let rec = NodeRef::record();
        rec.mark_trackable(false);
        assert_eq!(classify_node(&rec), Trackability::MarkedOpaque);

        let inst = NodeRef::instance("Clock");
        inst.mark_trackable(true);
        assert_eq!(classify_node(&inst), Trackability::MarkedTrackable);

        inst.clear_trackable_mark();
        assert!(!classify_node(&inst).is_tracked());
    }

    #[test]
    fn store_ownership_wins_over_marks() {
        let store = Store::new();
        let node = store.instance("Clock");
        node.mark_trackable(false);
        assert_eq!(classify_node(&node), Trackability::StoreOwned);
    }
}
