//! Per-mutation notification accumulation.
//!
//! A mutation accumulates everything it owes its subscribers while the
//! tree is borrowed; the facade delivers after the borrow is released.
//! Exactly one merged partial per listening subscriber, one refresh
//! per binding, one call per observer id, in that order. Nothing is
//! delivered until the mutation has fully committed.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use super::subscriptions::{BindingFn, Consumer, ObserverFn, SubscriberId};
use crate::models::path::PropertyPath;
use crate::models::value::assign_at;

/// What a binding receives at delivery time.
pub(crate) enum RefreshValue {
    /// Recompute the node snapshot when delivering, so the binding
    /// always sees the fully committed value.
    Live(PropertyPath),
    /// Deliver exactly this value; deletion publishes null.
    Final(Value),
}

struct PendingUpdate {
    consumer: Weak<dyn Consumer>,
    partial: Value,
}

struct PendingRefresh {
    value: RefreshValue,
    publish: Rc<BindingFn>,
}

/// Everything one mutation owes its subscribers.
#[derive(Default)]
pub(crate) struct NotificationBatch {
    updates: BTreeMap<SubscriberId, PendingUpdate>,
    refreshes: BTreeMap<SubscriberId, PendingRefresh>,
    observers: BTreeMap<SubscriberId, Rc<ObserverFn>>,
}

impl fmt::Debug for NotificationBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBatch")
            .field("updates", &self.updates.len())
            .field("refreshes", &self.refreshes.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl NotificationBatch {
    /// Merges one leaf-level value into the subscriber's pending
    /// partial at `address`. Later notes at a prefix of an earlier
    /// address replace the earlier subtree, which is what lets a
    /// shallow null supersede deeper child updates.
    pub(crate) fn note_leaf_update(
        &mut self,
        subscriber: SubscriberId,
        consumer: &Weak<dyn Consumer>,
        address: &PropertyPath,
        value: Value,
    ) {
        let pending = self.updates.entry(subscriber).or_insert_with(|| PendingUpdate {
            consumer: consumer.clone(),
            partial: Value::Object(Map::new()),
        });
        assign_at(&mut pending.partial, address.segments(), value);
    }

    /// Queues a live refresh for a binding. A final value already
    /// queued for the same binding wins.
    pub(crate) fn note_binding_live(
        &mut self,
        id: SubscriberId,
        path: &PropertyPath,
        publish: &Rc<BindingFn>,
    ) {
        self.refreshes.entry(id).or_insert_with(|| PendingRefresh {
            value: RefreshValue::Live(path.clone()),
            publish: publish.clone(),
        });
    }

    /// Queues a final value for a binding, superseding any live
    /// refresh queued earlier in the same mutation.
    pub(crate) fn note_binding_final(
        &mut self,
        id: SubscriberId,
        value: Value,
        publish: &Rc<BindingFn>,
    ) {
        self.refreshes.insert(
            id,
            PendingRefresh {
                value: RefreshValue::Final(value),
                publish: publish.clone(),
            },
        );
    }

    /// Queues an observer; one invocation per id per mutation.
    pub(crate) fn note_observer(&mut self, id: SubscriberId, callback: &Rc<ObserverFn>) {
        self.observers.entry(id).or_insert_with(|| callback.clone());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.refreshes.is_empty() && self.observers.is_empty()
    }

    /// Consumes the batch in delivery order: listener updates, binding
    /// refreshes, observer callbacks. Deterministic within each class.
    #[allow(clippy::type_complexity)]
    pub(crate) fn into_parts(
        self,
    ) -> (
        Vec<(SubscriberId, Weak<dyn Consumer>, Value)>,
        Vec<(RefreshValue, Rc<BindingFn>)>,
        Vec<Rc<ObserverFn>>,
    ) {
        let updates = self
            .updates
            .into_iter()
            .map(|(id, pending)| (id, pending.consumer, pending.partial))
            .collect();
        let refreshes = self
            .refreshes
            .into_values()
            .map(|pending| (pending.value, pending.publish))
            .collect();
        let observers = self.observers.into_values().collect();
        (updates, refreshes, observers)
    }
}
