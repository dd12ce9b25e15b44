//! Tree node model and per-node subscription bookkeeping.
//!
//! INVARIANT: a node is either a leaf holding one scalar (arrays and
//! null included) or a branch holding named children. Branch child
//! maps are `BTreeMap` so iteration and notification order within a
//! mutation is deterministic.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use super::subscriptions::{BindingFn, Consumer, ListenerKey, ObserverFn, SubscriberId};

/// The payload side of a node.
pub(crate) enum NodeValue {
    Leaf(Value),
    Branch(BTreeMap<String, PropertyNode>),
}

/// Per-node subscription bookkeeping.
///
/// Listener entries carry their alias already extended to this node's
/// depth; `None` addresses updates under the node's real absolute
/// path. Observer and binding callbacks are shared `Rc`s, so cloning
/// a set clones handles, not callbacks.
#[derive(Default, Clone)]
pub(crate) struct SubscriptionSet {
    pub(crate) listeners: HashMap<ListenerKey, Weak<dyn Consumer>>,
    pub(crate) observers: HashMap<SubscriberId, Rc<ObserverFn>>,
    pub(crate) bindings: HashMap<SubscriberId, Rc<BindingFn>>,
}

impl SubscriptionSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.observers.is_empty() && self.bindings.is_empty()
    }

    /// Folds another set in; entries from `other` win on key collision.
    pub(crate) fn merge(&mut self, other: SubscriptionSet) {
        self.listeners.extend(other.listeners);
        self.observers.extend(other.observers);
        self.bindings.extend(other.bindings);
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("listeners", &self.listeners.len())
            .field("observers", &self.observers.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// One node of the state tree: a value plus the subscriptions parked
/// directly on it. Nodes are addressed by path only; nothing outside
/// the store ever holds a reference to one.
pub(crate) struct PropertyNode {
    pub(crate) value: NodeValue,
    pub(crate) subs: SubscriptionSet,
}

impl PropertyNode {
    /// Builds a subtree from a plain value. Objects become branches
    /// with one child per key, everything else a leaf.
    pub(crate) fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let children = map
                    .into_iter()
                    .map(|(key, child)| (key, PropertyNode::from_value(child)))
                    .collect();
                Self {
                    value: NodeValue::Branch(children),
                    subs: SubscriptionSet::default(),
                }
            }
            other => Self {
                value: NodeValue::Leaf(other),
                subs: SubscriptionSet::default(),
            },
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.value, NodeValue::Leaf(_))
    }

    /// Plain-data projection of this subtree. Snapshots are deep
    /// copies; they never expose nodes or subscriptions.
    pub(crate) fn snapshot(&self) -> Value {
        match &self.value {
            NodeValue::Leaf(value) => value.clone(),
            NodeValue::Branch(children) => {
                let mut map = Map::new();
                for (key, child) in children {
                    map.insert(key.clone(), child.snapshot());
                }
                Value::Object(map)
            }
        }
    }
}

impl fmt::Debug for PropertyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            NodeValue::Leaf(value) => f
                .debug_struct("PropertyNode")
                .field("leaf", value)
                .field("subs", &self.subs)
                .finish(),
            NodeValue::Branch(children) => f
                .debug_struct("PropertyNode")
                .field("children", &children.keys().collect::<Vec<_>>())
                .field("subs", &self.subs)
                .finish(),
        }
    }
}
