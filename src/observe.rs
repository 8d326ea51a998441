//! The property observer: turns a plain JSON value into an instrumented
//! tree in which every object property is a typed slot backed by its own
//! subscription channel.
//!
//! Plain input values and instrumented nodes are distinct types, so an
//! already-observed subtree can never be wrapped a second time - the
//! double-instrumentation hazard of accessor-patching designs does not
//! exist here.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value;

use crate::arena::{ChannelArena, ChannelId};
use crate::hash::FixedHashBuilder;

// Object identities are monotonic across the process. They stand in for
// reference identity of the source object when evaluation results are
// compared: the same instrumented object compares equal to itself, a
// freshly assigned one never compares equal to its predecessor.
static NEXT_OBJECT_IDENTITY: AtomicU64 = AtomicU64::new(0);

/// One observed property: the stored node plus its broadcast channel.
pub(crate) struct Slot {
    pub(crate) node: Node,
    pub(crate) channel: ChannelId,
}

/// An instrumented value.
///
/// Scalars and arrays are stored as plain leaves (array index/length
/// mutations are not tracked; an array behaves as one opaque value).
/// Objects become [`ObjectNode`]s whose every property is a [`Slot`].
pub(crate) enum Node {
    Leaf(Value),
    Object(ObjectNode),
}

/// An instrumented object: identity plus properties in insertion order.
pub(crate) struct ObjectNode {
    pub(crate) identity: u64,
    pub(crate) slots: IndexMap<String, Slot, FixedHashBuilder>,
}

/// Instrument a plain value.
///
/// Object-valued properties are instrumented depth-first, so a nested
/// structure is fully reactive before its parent slot exists. Every
/// property gets a channel, including ones holding `null`.
pub(crate) fn instrument(value: Value, channels: &ChannelArena) -> Node {
    match value {
        Value::Object(map) => {
            let mut slots = IndexMap::with_hasher(FixedHashBuilder);
            for (key, val) in map {
                let node = instrument(val, channels);
                let channel = channels.insert();
                slots.insert(key, Slot { node, channel });
            }
            tracing::trace!(properties = slots.len(), "instrumented object");
            Node::Object(ObjectNode {
                identity: NEXT_OBJECT_IDENTITY.fetch_add(1, Ordering::Relaxed),
                slots,
            })
        }
        other => Node::Leaf(other),
    }
}

/// Clone a node back into a plain value, dropping the instrumentation.
pub(crate) fn snapshot(node: &Node) -> Value {
    match node {
        Node::Leaf(value) => value.clone(),
        Node::Object(object) => {
            let mut map = serde_json::Map::new();
            for (key, slot) in &object.slots {
                map.insert(key.clone(), snapshot(&slot.node));
            }
            Value::Object(map)
        }
    }
}

/// True for values that compare by value across writes: null, booleans,
/// numbers, strings. Objects and arrays never do - a freshly supplied
/// one is a new identity no matter its contents.
pub(crate) fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// First change-suppression layer: a write is dropped when it would
/// store a scalar equal to the scalar already in the slot.
pub(crate) fn write_is_noop(current: &Node, incoming: &Value) -> bool {
    match current {
        Node::Leaf(value) => is_scalar(value) && is_scalar(incoming) && value == incoming,
        Node::Object(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_stay_plain_leaves() {
        let channels = ChannelArena::new();
        assert!(matches!(
            instrument(json!(42), &channels),
            Node::Leaf(Value::Number(_))
        ));
        assert!(matches!(
            instrument(json!(null), &channels),
            Node::Leaf(Value::Null)
        ));
    }

    #[test]
    fn every_property_gets_a_slot_including_null_ones() {
        let channels = ChannelArena::new();
        let node = instrument(json!({"a": 1, "b": null, "c": {"d": true}}), &channels);
        let Node::Object(object) = node else {
            panic!("expected object node");
        };
        assert_eq!(object.slots.len(), 3);
        assert!(matches!(
            object.slots.get("b").unwrap().node,
            Node::Leaf(Value::Null)
        ));
        let Node::Object(inner) = &object.slots.get("c").unwrap().node else {
            panic!("nested object should be instrumented");
        };
        assert_eq!(inner.slots.len(), 1);
    }

    #[test]
    fn identities_differ_between_objects() {
        let channels = ChannelArena::new();
        let node = instrument(json!({"x": {}, "y": {}}), &channels);
        let Node::Object(object) = node else {
            panic!("expected object node");
        };
        let ids: Vec<u64> = ["x", "y"]
            .iter()
            .map(|key| match &object.slots.get(*key).unwrap().node {
                Node::Object(inner) => inner.identity,
                Node::Leaf(_) => panic!("expected object"),
            })
            .collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(object.identity, ids[0]);
    }

    #[test]
    fn snapshot_round_trips_structure_and_order() {
        let channels = ChannelArena::new();
        let source = json!({"z": 1, "a": {"k": [1, 2]}, "m": "s"});
        let node = instrument(source.clone(), &channels);
        assert_eq!(snapshot(&node), source);
    }

    #[test]
    fn noop_detection_covers_scalars_only() {
        let channels = ChannelArena::new();
        assert!(write_is_noop(
            &instrument(json!(1), &channels),
            &json!(1)
        ));
        assert!(!write_is_noop(
            &instrument(json!(1), &channels),
            &json!(2)
        ));
        // Arrays and objects never suppress, even when structurally equal.
        assert!(!write_is_noop(
            &instrument(json!([1]), &channels),
            &json!([1])
        ));
        assert!(!write_is_noop(
            &instrument(json!({"a": 1}), &channels),
            &json!({"a": 1})
        ));
    }
}
