//! Subscription index: listener, observer and binding bookkeeping.
//!
//! Registration copies entries down the subtree so every leaf can
//! notify independently, and structural rebuilds re-seat parked
//! entries. Ownership is explicit per node; no two nodes ever share a
//! subscription map.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::node::{NodeValue, PropertyNode, SubscriptionSet};
use crate::models::path::PropertyPath;

/// Opaque, process-unique identity minted by the store at registration
/// time. Consumers never choose their own id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives partial-state updates for the paths a consumer subscribed
/// to.
///
/// Implementations merge each partial into their own local projection.
/// `receive_update` runs synchronously after the triggering mutation
/// has committed, so it may freely call back into the store.
pub trait Consumer {
    fn receive_update(&self, update: Value);
}

/// Callback fired when a watched value changes.
pub type ObserverFn = dyn Fn();

/// Callback receiving a freshly recomputed snapshot of a bound node.
pub type BindingFn = dyn Fn(Value);

/// Listener identity on one node: the owning subscriber plus the alias
/// updates are addressed under, pre-extended to the node's depth.
/// `None` addresses updates under the node's real absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ListenerKey {
    pub(crate) subscriber: SubscriberId,
    pub(crate) alias: Option<PropertyPath>,
}

/// Inserts a listener entry at `node` and every present descendant,
/// extending the alias by each child key on the way down. Inserting
/// the same `(subscriber, alias)` twice is an idempotent overwrite.
pub(crate) fn attach_listener(
    node: &mut PropertyNode,
    key: ListenerKey,
    consumer: Weak<dyn Consumer>,
) {
    if let NodeValue::Branch(children) = &mut node.value {
        for (child_key, child) in children.iter_mut() {
            let extended = ListenerKey {
                subscriber: key.subscriber,
                alias: key.alias.as_ref().map(|alias| alias.child(child_key)),
            };
            attach_listener(child, extended, consumer.clone());
        }
    }
    node.subs.listeners.insert(key, consumer);
}

/// Propagates a parent's listener entries into a freshly built child
/// subtree. New nodes inherit their parent's coverage, which is how a
/// subtree listener comes to cover leaves added after registration.
pub(crate) fn inherit_listeners(
    parent_listeners: &std::collections::HashMap<ListenerKey, Weak<dyn Consumer>>,
    child_key: &str,
    child: &mut PropertyNode,
) {
    for (key, consumer) in parent_listeners {
        let extended = ListenerKey {
            subscriber: key.subscriber,
            alias: key.alias.as_ref().map(|alias| alias.child(child_key)),
        };
        attach_listener(child, extended, consumer.clone());
    }
}

/// Copies an observer callback into `node` and every present
/// descendant so each leaf can fire it independently.
pub(crate) fn attach_observer(node: &mut PropertyNode, id: SubscriberId, callback: Rc<ObserverFn>) {
    if let NodeValue::Branch(children) = &mut node.value {
        for child in children.values_mut() {
            attach_observer(child, id, callback.clone());
        }
    }
    node.subs.observers.insert(id, callback);
}

/// Removes every listener, observer and binding entry owned by `id` in
/// the whole subtree. Idempotent.
pub(crate) fn detach_subscriber(node: &mut PropertyNode, id: SubscriberId) {
    node.subs.listeners.retain(|key, _| key.subscriber != id);
    node.subs.observers.remove(&id);
    node.subs.bindings.remove(&id);
    if let NodeValue::Branch(children) = &mut node.value {
        for child in children.values_mut() {
            detach_subscriber(child, id);
        }
    }
}

/// Re-seats a parked subscription set onto a node: listeners and
/// observers propagate down from their seat, bindings stay put.
pub(crate) fn seat(node: &mut PropertyNode, set: SubscriptionSet) {
    for (key, consumer) in set.listeners {
        attach_listener(node, key, consumer);
    }
    for (id, callback) in set.observers {
        attach_observer(node, id, callback);
    }
    for (id, publish) in set.bindings {
        node.subs.bindings.insert(id, publish);
    }
}

/// Subscriptions parked by deletions, keyed by the absolute path they
/// were detached from, awaiting a matching re-add at the same path.
#[derive(Default)]
pub(crate) struct OrphanedSubscriptions {
    parked: BTreeMap<PropertyPath, SubscriptionSet>,
}

impl OrphanedSubscriptions {
    /// Parks a non-empty set; repeated deletions at the same path
    /// merge, newest entries winning.
    pub(crate) fn park(&mut self, path: PropertyPath, set: SubscriptionSet) {
        if set.is_empty() {
            return;
        }
        self.parked.entry(path).or_default().merge(set);
    }

    /// Removes and returns every parked set at or under `prefix`.
    pub(crate) fn drain_under(
        &mut self,
        prefix: &PropertyPath,
    ) -> Vec<(PropertyPath, SubscriptionSet)> {
        let keys: Vec<PropertyPath> = self
            .parked
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.parked.remove(&key).map(|set| (key, set)))
            .collect()
    }

    /// Purges every parked entry owned by `id`, dropping sets that end
    /// up empty. Covers listeners, observers and bindings alike.
    pub(crate) fn purge_id(&mut self, id: SubscriberId) {
        for set in self.parked.values_mut() {
            set.listeners.retain(|key, _| key.subscriber != id);
            set.observers.remove(&id);
            set.bindings.remove(&id);
        }
        self.parked.retain(|_, set| !set.is_empty());
    }

    #[cfg(test)]
    pub(crate) fn parked_count(&self) -> usize {
        self.parked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    struct Sink {
        seen: RefCell<Vec<Value>>,
    }

    impl Consumer for Sink {
        fn receive_update(&self, update: Value) {
            self.seen.borrow_mut().push(update);
        }
    }

    fn tree() -> PropertyNode {
        PropertyNode::from_value(json!({
            "name": "Mike",
            "address": {"city": "Austin", "zip": "78701"},
        }))
    }

    fn listener_aliases(node: &PropertyNode) -> Vec<String> {
        node.subs
            .listeners
            .keys()
            .map(|key| {
                key.alias
                    .as_ref()
                    .map(|alias| alias.to_string())
                    .unwrap_or_else(|| "<real>".to_string())
            })
            .collect()
    }

    #[test]
    fn test_attach_listener_copies_down_and_extends_alias() {
        let mut root = tree();
        let consumer = Rc::new(Sink {
            seen: RefCell::new(Vec::new()),
        });
        let weak: Weak<dyn Consumer> = Rc::<Sink>::downgrade(&consumer);
        let key = ListenerKey {
            subscriber: SubscriberId::mint(),
            alias: Some(PropertyPath::parse("person").unwrap()),
        };
        attach_listener(&mut root, key, weak);

        assert_eq!(listener_aliases(&root), vec!["person"]);
        match &root.value {
            NodeValue::Branch(children) => {
                assert_eq!(listener_aliases(&children["name"]), vec!["person.name"]);
                match &children["address"].value {
                    NodeValue::Branch(inner) => {
                        assert_eq!(
                            listener_aliases(&inner["city"]),
                            vec!["person.address.city"]
                        );
                    }
                    NodeValue::Leaf(_) => panic!("address should be a branch"),
                }
            }
            NodeValue::Leaf(_) => panic!("root should be a branch"),
        }
    }

    #[test]
    fn test_attach_observer_copies_down_and_detach_removes_everywhere() {
        let mut root = tree();
        let id = SubscriberId::mint();
        attach_observer(&mut root, id, Rc::new(|| {}));
        match &root.value {
            NodeValue::Branch(children) => {
                assert_eq!(children["name"].subs.observers.len(), 1);
            }
            NodeValue::Leaf(_) => panic!("root should be a branch"),
        }
        detach_subscriber(&mut root, id);
        assert!(root.subs.observers.is_empty());
        match &root.value {
            NodeValue::Branch(children) => {
                assert!(children["name"].subs.observers.is_empty());
            }
            NodeValue::Leaf(_) => panic!("root should be a branch"),
        }
    }

    #[test]
    fn test_orphans_park_drain_and_purge() {
        let mut orphans = OrphanedSubscriptions::default();
        let id = SubscriberId::mint();
        let mut set = SubscriptionSet::default();
        set.observers.insert(id, Rc::new(|| {}));
        orphans.park(PropertyPath::parse("a.b").unwrap(), set);
        orphans.park(PropertyPath::parse("a.b.c").unwrap(), SubscriptionSet::default());
        assert_eq!(orphans.parked_count(), 1);

        let drained = orphans.drain_under(&PropertyPath::parse("a").unwrap());
        assert_eq!(drained.len(), 1);
        assert_eq!(orphans.parked_count(), 0);

        let (path, set) = drained.into_iter().next().unwrap();
        orphans.park(path, set);
        orphans.purge_id(id);
        assert_eq!(orphans.parked_count(), 0);
    }
}
