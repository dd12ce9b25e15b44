//! Mutation engine for the state tree.
//!
//! Every operation runs in two phases. Validation walks the tree
//! immutably and rejects the whole mutation on the first problem, so
//! a failed call leaves the tree untouched. Application then mutates
//! nodes and accumulates a [`NotificationBatch`]; nothing is delivered
//! here. The facade releases its borrow of the tree before draining
//! the batch, which is what makes re-entrant mutations from inside
//! callbacks safe.
//!
//! Deleted subtrees do not lose their subscriptions: each removed
//! node's set is parked in [`OrphanedSubscriptions`] under its old
//! absolute path and re-seated if a later mutation rebuilds that path.

use std::collections::BTreeMap;
use std::rc::Weak;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::error::StoreError;
use super::events::NotificationBatch;
use super::node::{NodeValue, PropertyNode, SubscriptionSet};
use super::resolver;
use super::subscriptions::{
    attach_observer, inherit_listeners, seat, Consumer, OrphanedSubscriptions, SubscriberId,
};
use crate::models::path::PropertyPath;
use crate::models::value::{prefix_minimal, value_kind};

/// Writes `payload` at `path`, merging into object nodes by default.
/// With `merge` off, keys of the target object absent from the payload
/// are deleted. The path itself must already exist; absent keys inside
/// an object payload are added implicitly.
pub(crate) fn set(
    root: &mut PropertyNode,
    orphans: &mut OrphanedSubscriptions,
    path: &PropertyPath,
    payload: Value,
    merge: bool,
) -> Result<NotificationBatch, StoreError> {
    {
        let target = resolver::resolve(root, path)?;
        check_set(target, path, &payload)?;
    }
    trace!("Applying set at {} (merge: {})", path, merge);
    let mut batch = NotificationBatch::default();
    let target = resolver::resolve_mut(root, path)?;
    apply_set(target, path, payload, merge, orphans, &mut batch);
    refresh_ancestors(root, path, &mut batch);
    Ok(batch)
}

/// Creates a new property at `path`. The parent must exist and be an
/// object; the key must be free. Listeners covering the parent extend
/// over the new subtree, and subscriptions parked under `path` by an
/// earlier deletion are revived.
pub(crate) fn add_property(
    root: &mut PropertyNode,
    orphans: &mut OrphanedSubscriptions,
    path: &PropertyPath,
    payload: Value,
) -> Result<NotificationBatch, StoreError> {
    let mut batch = NotificationBatch::default();
    {
        let (parent, key) = resolver::resolve_parent_mut(root, path)?;
        let NodeValue::Branch(children) = &mut parent.value else {
            return Err(StoreError::not_an_object(
                path.parent()
                    .map(|parent_path| parent_path.to_string())
                    .unwrap_or_else(|| path.to_string()),
            ));
        };
        if children.contains_key(key) {
            return Err(StoreError::duplicate_property(path.to_string()));
        }
        debug!("Adding property at {}", path);
        let mut child = PropertyNode::from_value(payload);
        inherit_listeners(&parent.subs.listeners, key, &mut child);
        reattach_orphans_under(&mut child, path, orphans);
        note_built_subtree(&child, path, &mut batch);
        children.insert(key.to_string(), child);
    }
    refresh_ancestors(root, path, &mut batch);
    Ok(batch)
}

/// Removes the node at `path` with its whole subtree. Listeners that
/// covered it receive null at their addresses; bindings on removed
/// nodes receive a final null. Every removed node's subscription set
/// is parked for revival at the same path.
pub(crate) fn delete_property(
    root: &mut PropertyNode,
    orphans: &mut OrphanedSubscriptions,
    path: &PropertyPath,
) -> Result<NotificationBatch, StoreError> {
    let mut batch = NotificationBatch::default();
    {
        let (parent, key) = resolver::resolve_parent_mut(root, path)
            .map_err(|_| StoreError::path_not_found(path.to_string()))?;
        let NodeValue::Branch(children) = &mut parent.value else {
            return Err(StoreError::path_not_found(path.to_string()));
        };
        let Some(child) = children.remove(key) else {
            return Err(StoreError::path_not_found(path.to_string()));
        };
        debug!("Deleting property at {}", path);
        let mut retired = RetiredListeners::default();
        retire_subtree(child, path.clone(), orphans, &mut retired, &mut batch);
        retired.flush(&mut batch);
    }
    refresh_ancestors(root, path, &mut batch);
    Ok(batch)
}

/// Empties an object node's children with full deletion semantics for
/// each of them, equivalent to a replace-set of `{}`. The node itself
/// survives as an empty object and keeps its own subscriptions.
pub(crate) fn clear_property(
    root: &mut PropertyNode,
    orphans: &mut OrphanedSubscriptions,
    path: &PropertyPath,
) -> Result<NotificationBatch, StoreError> {
    {
        let target = resolver::resolve(root, path)?;
        if target.is_leaf() {
            return Err(StoreError::not_an_object(path.to_string()));
        }
    }
    debug!("Clearing children at {}", path);
    let mut batch = NotificationBatch::default();
    let target = resolver::resolve_mut(root, path)?;
    apply_set(
        target,
        path,
        Value::Object(Map::new()),
        false,
        orphans,
        &mut batch,
    );
    refresh_ancestors(root, path, &mut batch);
    Ok(batch)
}

/// Rejects the mutation before anything is written. Object payloads
/// recurse into keys the target already has; a non-object, non-null
/// payload can never land on an object node.
fn check_set(node: &PropertyNode, abs: &PropertyPath, payload: &Value) -> Result<(), StoreError> {
    match (&node.value, payload) {
        (NodeValue::Branch(children), Value::Object(map)) => {
            for (key, child_payload) in map {
                if let Some(child) = children.get(key) {
                    check_set(child, &abs.child(key), child_payload)?;
                }
            }
            Ok(())
        }
        (NodeValue::Branch(_), Value::Null) => Ok(()),
        (NodeValue::Branch(_), other) => Err(StoreError::type_mismatch(
            abs.to_string(),
            "object or null",
            value_kind(other),
        )),
        (NodeValue::Leaf(_), _) => Ok(()),
    }
}

/// Applies a validated payload. Notification does not depend on what
/// the payload changed; writing an equal value or an empty object
/// still notifies.
fn apply_set(
    node: &mut PropertyNode,
    abs: &PropertyPath,
    payload: Value,
    merge: bool,
    orphans: &mut OrphanedSubscriptions,
    batch: &mut NotificationBatch,
) {
    match payload {
        Value::Object(map) => {
            if node.is_leaf() {
                promote_leaf(node, abs, map, orphans, batch);
            } else {
                apply_object_set(node, abs, map, merge, orphans, batch);
            }
        }
        Value::Null if !node.is_leaf() => null_wipe(node, abs, orphans, batch),
        other => write_leaf(node, abs, other, batch),
    }
}

/// Replaces a leaf value. An equal value still counts as a write.
fn write_leaf(node: &mut PropertyNode, abs: &PropertyPath, value: Value, batch: &mut NotificationBatch) {
    note_value_write(&node.subs, abs, &value, batch);
    node.value = NodeValue::Leaf(value);
}

/// Turns a leaf into an object node. The node keeps its own
/// subscriptions and re-homes them over the rebuilt subtree: listeners
/// extend down with their aliases, observers are copied down, bindings
/// stay on the node. Subscriptions parked under this path come back to
/// life.
fn promote_leaf(
    node: &mut PropertyNode,
    abs: &PropertyPath,
    map: Map<String, Value>,
    orphans: &mut OrphanedSubscriptions,
    batch: &mut NotificationBatch,
) {
    let mut children = BTreeMap::new();
    for (key, child_payload) in map {
        let mut child = PropertyNode::from_value(child_payload);
        inherit_listeners(&node.subs.listeners, &key, &mut child);
        for (id, callback) in &node.subs.observers {
            attach_observer(&mut child, *id, callback.clone());
        }
        children.insert(key, child);
    }
    node.value = NodeValue::Branch(children);
    reattach_orphans_under(node, abs, orphans);
    note_built_subtree(node, abs, batch);
}

/// Writes null over an object node, tearing its children down with
/// full deletion semantics. The node itself survives as a null leaf
/// and keeps its subscriptions, so the shape can be rebuilt later.
fn null_wipe(
    node: &mut PropertyNode,
    abs: &PropertyPath,
    orphans: &mut OrphanedSubscriptions,
    batch: &mut NotificationBatch,
) {
    let mut retired = RetiredListeners::default();
    if let NodeValue::Branch(children) =
        std::mem::replace(&mut node.value, NodeValue::Leaf(Value::Null))
    {
        for (key, child) in children {
            retire_subtree(child, abs.child(&key), orphans, &mut retired, batch);
        }
    }
    retired.flush(batch);
    note_value_write(&node.subs, abs, &Value::Null, batch);
}

/// Merges or replaces an object payload into a branch node. The
/// node's own bindings refresh even when the payload writes nothing;
/// an empty object is a real write.
fn apply_object_set(
    node: &mut PropertyNode,
    abs: &PropertyPath,
    map: Map<String, Value>,
    merge: bool,
    orphans: &mut OrphanedSubscriptions,
    batch: &mut NotificationBatch,
) {
    let PropertyNode { value, subs } = node;
    let NodeValue::Branch(children) = value else {
        return;
    };
    if !merge {
        let doomed: Vec<String> = children
            .keys()
            .filter(|key| !map.contains_key(key.as_str()))
            .cloned()
            .collect();
        let mut retired = RetiredListeners::default();
        for key in doomed {
            if let Some(child) = children.remove(&key) {
                retire_subtree(child, abs.child(&key), orphans, &mut retired, batch);
            }
        }
        retired.flush(batch);
    }
    for (key, child_payload) in map {
        let child_abs = abs.child(&key);
        match children.get_mut(&key) {
            Some(child) => {
                apply_set(child, &child_abs, child_payload, merge, orphans, batch);
            }
            None => {
                let mut child = PropertyNode::from_value(child_payload);
                inherit_listeners(&subs.listeners, &key, &mut child);
                reattach_orphans_under(&mut child, &child_abs, orphans);
                note_built_subtree(&child, &child_abs, batch);
                children.insert(key, child);
            }
        }
    }
    for (id, publish) in &subs.bindings {
        batch.note_binding_live(*id, abs, publish);
    }
}

/// Queues everything one node owes for a value written onto it:
/// listeners at their alias or absolute address, bindings as a live
/// refresh, observers once.
fn note_value_write(
    subs: &SubscriptionSet,
    abs: &PropertyPath,
    value: &Value,
    batch: &mut NotificationBatch,
) {
    for (key, consumer) in &subs.listeners {
        let address = key.alias.as_ref().unwrap_or(abs);
        batch.note_leaf_update(key.subscriber, consumer, address, value.clone());
    }
    for (id, publish) in &subs.bindings {
        batch.note_binding_live(*id, abs, publish);
    }
    for (id, callback) in &subs.observers {
        batch.note_observer(*id, callback);
    }
}

/// Queues notes for a freshly built subtree. Every node of it counts
/// as written, so inherited listeners and re-seated subscriptions all
/// see the new values. Snapshots of nested nodes agree with their
/// parents, so note order cannot change the assembled partial.
fn note_built_subtree(node: &PropertyNode, abs: &PropertyPath, batch: &mut NotificationBatch) {
    let snapshot = node.snapshot();
    note_value_write(&node.subs, abs, &snapshot, batch);
    if let NodeValue::Branch(children) = &node.value {
        for (key, child) in children {
            note_built_subtree(child, &abs.child(key), batch);
        }
    }
}

/// Null notes owed to listeners of removed subtrees, grouped per
/// subscriber so the whole group can be prefix-reduced before it
/// lands in the batch.
#[derive(Default)]
struct RetiredListeners {
    by_subscriber: BTreeMap<SubscriberId, (Weak<dyn Consumer>, Vec<PropertyPath>)>,
}

impl RetiredListeners {
    fn note(&mut self, subscriber: SubscriberId, consumer: &Weak<dyn Consumer>, address: PropertyPath) {
        self.by_subscriber
            .entry(subscriber)
            .or_insert_with(|| (consumer.clone(), Vec::new()))
            .1
            .push(address);
    }

    /// Emits one null per prefix-minimal address. Flush before noting
    /// any write at a shallower path, so the later note supersedes the
    /// nulls instead of being buried under them.
    fn flush(self, batch: &mut NotificationBatch) {
        for (subscriber, (consumer, addresses)) in self.by_subscriber {
            for address in prefix_minimal(addresses) {
                batch.note_leaf_update(subscriber, &consumer, &address, Value::Null);
            }
        }
    }
}

/// Consumes a removed subtree: collects the null notes its listeners
/// are owed, finalizes its bindings with null, and parks every node's
/// subscription set under its old absolute path.
fn retire_subtree(
    node: PropertyNode,
    abs: PropertyPath,
    orphans: &mut OrphanedSubscriptions,
    retired: &mut RetiredListeners,
    batch: &mut NotificationBatch,
) {
    let PropertyNode { value, subs } = node;
    for (key, consumer) in &subs.listeners {
        let address = key.alias.clone().unwrap_or_else(|| abs.clone());
        retired.note(key.subscriber, consumer, address);
    }
    for (id, publish) in &subs.bindings {
        batch.note_binding_final(*id, Value::Null, publish);
    }
    orphans.park(abs.clone(), subs);
    if let NodeValue::Branch(children) = value {
        for (key, child) in children {
            retire_subtree(child, abs.child(&key), orphans, retired, batch);
        }
    }
}

/// Drains parked subscription sets at or under `abs` and seats the
/// ones whose old path exists again inside the rebuilt subtree. Sets
/// whose path is still missing go back to the parking lot.
fn reattach_orphans_under(
    node: &mut PropertyNode,
    abs: &PropertyPath,
    orphans: &mut OrphanedSubscriptions,
) {
    let mut seated = 0usize;
    for (parked_path, set) in orphans.drain_under(abs) {
        let Some(relative) = parked_path.strip_prefix(abs) else {
            orphans.park(parked_path, set);
            continue;
        };
        match resolver::resolve_segments_mut(node, relative) {
            Some(target) => {
                seat(target, set);
                seated += 1;
            }
            None => orphans.park(parked_path, set),
        }
    }
    if seated > 0 {
        debug!("Re-seated {} parked subscription set(s) under {}", seated, abs);
    }
}

/// Queues live refreshes for bindings on every strict ancestor of a
/// mutated path; their snapshots contain the mutated subtree.
fn refresh_ancestors(root: &PropertyNode, path: &PropertyPath, batch: &mut NotificationBatch) {
    for depth in 1..path.len() {
        if let Some(prefix) = path.prefix(depth) {
            if let Ok(node) = resolver::resolve(root, &prefix) {
                for (id, publish) in &node.subs.bindings {
                    batch.note_binding_live(*id, &prefix, publish);
                }
            }
        }
    }
}
