//! Shared state tree facade.
//!
//! [`TreeStore`] is a cheaply cloneable handle to one tree of
//! property nodes plus its subscription index and action registry.
//! Every mutation runs in three stages: validate, apply under a
//! short-lived borrow while accumulating a notification batch, then
//! deliver the batch after the borrow is released. Callbacks therefore
//! always see fully committed state and may call back into the store,
//! including mutating it again.
//!
//! Handles are single-threaded by construction (`Rc` inside); one
//! store is live per thread at a time.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tracing::debug;

use super::actions::{ActionHandler, ActionRegistry};
use crate::models::path::{PropertyPath, RegistrationSpec};
use crate::models::value::{assign_at, value_kind};
use crate::store::error::StoreError;
use crate::store::events::{NotificationBatch, RefreshValue};
use crate::store::mutation;
use crate::store::node::PropertyNode;
use crate::store::resolver;
use crate::store::subscriptions::{
    attach_listener, attach_observer, detach_subscriber, Consumer, ListenerKey, ObserverFn,
    OrphanedSubscriptions, SubscriberId,
};

thread_local! {
    static STORE_LIVE: Cell<bool> = const { Cell::new(false) };
}

struct StoreInner {
    root: PropertyNode,
    orphans: OrphanedSubscriptions,
    actions: ActionRegistry,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        STORE_LIVE.with(|live| live.set(false));
    }
}

/// How [`TreeStore::set_with`] treats object payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge object payloads into the target (default). When off, the
    /// payload replaces the target object and keys it omits are
    /// deleted.
    pub merge: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { merge: true }
    }
}

impl SetOptions {
    /// Replace semantics: the payload becomes the whole object.
    pub fn replace() -> Self {
        Self { merge: false }
    }
}

/// Outcome of [`TreeStore::register`]: the minted subscriber identity
/// and the initial state assembled from the registered paths, each
/// placed under its alias.
#[derive(Debug, Clone)]
pub struct Registration {
    pub subscriber: SubscriberId,
    pub initial_state: Value,
}

/// Handle to one observer or binding registration. Cancelling (or
/// dropping) removes the subscription everywhere, parked copies
/// included. Cancellation is idempotent and takes effect for
/// mutations after the current one.
pub struct Subscription {
    store: Weak<RefCell<StoreInner>>,
    id: SubscriberId,
    cancelled: Cell<bool>,
}

impl Subscription {
    fn new(store: Weak<RefCell<StoreInner>>, id: SubscriberId) -> Self {
        Self {
            store,
            id,
            cancelled: Cell::new(false),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Detaches the subscription from every node it reached. Safe to
    /// call from inside callbacks and after the store is gone.
    pub fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            let mut inner = inner.borrow_mut();
            let StoreInner { root, orphans, .. } = &mut *inner;
            detach_subscriber(root, self.id);
            orphans.purge_id(self.id);
            debug!("Cancelled subscription {}", self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled.get())
            .finish()
    }
}

/// Shared, mutable, path-addressable state tree with fine-grained
/// change notification.
///
/// # Examples
///
/// ```
/// use statespace_core::TreeStore;
/// use serde_json::json;
///
/// let store = TreeStore::initialize(json!({"counter": 0}))?;
/// store.set("counter", json!(5))?;
/// assert_eq!(store.get("counter")?, json!(5));
/// # Ok::<(), statespace_core::StoreError>(())
/// ```
#[derive(Clone)]
pub struct TreeStore {
    inner: Rc<RefCell<StoreInner>>,
}

impl TreeStore {
    /// Creates the thread's store from an initial object value.
    ///
    /// Returns [`StoreError::AlreadyInitialized`] while another store
    /// is live on the same thread; dropping every handle of the old
    /// store frees the slot.
    pub fn initialize(initial: Value) -> Result<TreeStore, StoreError> {
        let Value::Object(map) = initial else {
            return Err(StoreError::type_mismatch(
                "root",
                "object",
                value_kind(&initial),
            ));
        };
        STORE_LIVE.with(|live| {
            if live.replace(true) {
                Err(StoreError::AlreadyInitialized)
            } else {
                Ok(())
            }
        })?;
        debug!("Initializing state tree with {} top-level key(s)", map.len());
        let inner = StoreInner {
            root: PropertyNode::from_value(Value::Object(map)),
            orphans: OrphanedSubscriptions::default(),
            actions: ActionRegistry::default(),
        };
        Ok(TreeStore {
            inner: Rc::new(RefCell::new(inner)),
        })
    }

    /// Deep copy of the whole tree as plain data.
    pub fn snapshot(&self) -> Value {
        self.inner.borrow().root.snapshot()
    }

    /// Deep copy of the subtree at `path`.
    pub fn get(&self, path: &str) -> Result<Value, StoreError> {
        let parsed = PropertyPath::parse(path)?;
        let inner = self.inner.borrow();
        let node = resolver::resolve(&inner.root, &parsed)?;
        Ok(node.snapshot())
    }

    /// Writes `payload` at `path` with merge semantics for objects.
    ///
    /// Scalar payloads replace leaf values; object payloads merge into
    /// object nodes key by key, adding keys the target does not have
    /// yet. Writing an object over a leaf turns the leaf into a
    /// subtree; writing null over an object tears its children down.
    /// The path itself must already exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use statespace_core::TreeStore;
    /// use serde_json::json;
    ///
    /// let store = TreeStore::initialize(json!({
    ///     "account": {"name": "Mike", "city": "Austin"}
    /// }))?;
    /// store.set("account", json!({"name": "Victor"}))?;
    /// assert_eq!(
    ///     store.get("account")?,
    ///     json!({"name": "Victor", "city": "Austin"})
    /// );
    /// # Ok::<(), statespace_core::StoreError>(())
    /// ```
    pub fn set(&self, path: &str, payload: Value) -> Result<(), StoreError> {
        self.set_with(path, payload, SetOptions::default())
    }

    /// [`set`](TreeStore::set) with explicit merge or replace
    /// semantics.
    pub fn set_with(
        &self,
        path: &str,
        payload: Value,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        let parsed = PropertyPath::parse(path)?;
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let StoreInner { root, orphans, .. } = &mut *inner;
            mutation::set(root, orphans, &parsed, payload, options.merge)?
        };
        self.deliver(batch);
        Ok(())
    }

    /// Creates a new property at `path` under an existing object
    /// parent. Listeners covering the parent extend over the new
    /// subtree; subscriptions parked by a deletion at the same path
    /// come back to life.
    pub fn add_property(&self, path: &str, payload: Value) -> Result<(), StoreError> {
        let parsed = PropertyPath::parse(path)?;
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let StoreInner { root, orphans, .. } = &mut *inner;
            mutation::add_property(root, orphans, &parsed, payload)?
        };
        self.deliver(batch);
        Ok(())
    }

    /// Removes the property at `path` with its whole subtree.
    /// Listeners that covered it receive null at their addresses;
    /// subscriptions on removed nodes are parked for revival should
    /// the path be rebuilt.
    pub fn delete_property(&self, path: &str) -> Result<(), StoreError> {
        let parsed = PropertyPath::parse(path)?;
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let StoreInner { root, orphans, .. } = &mut *inner;
            mutation::delete_property(root, orphans, &parsed)?
        };
        self.deliver(batch);
        Ok(())
    }

    /// Empties the object node at `path`, deleting every child with
    /// full delete semantics while the node itself survives as an
    /// empty object with its own subscriptions intact. Fails with
    /// [`StoreError::NotAnObject`] on a leaf target.
    pub fn clear_property(&self, path: &str) -> Result<(), StoreError> {
        let parsed = PropertyPath::parse(path)?;
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let StoreInner { root, orphans, .. } = &mut *inner;
            mutation::clear_property(root, orphans, &parsed)?
        };
        self.deliver(batch);
        Ok(())
    }

    /// Registers a consumer for a set of path specs, each optionally
    /// aliased with `"a.b.c as x.y"`. Every spec must resolve, or
    /// nothing is registered. The returned [`Registration`] carries
    /// the initial state assembled under the aliases; with no specs at
    /// all the consumer covers the whole tree and receives a full
    /// snapshot.
    ///
    /// The store keeps only a weak handle to the consumer; dropping
    /// the consumer ends its subscription.
    ///
    /// # Examples
    ///
    /// ```
    /// use statespace_core::{Consumer, TreeStore};
    /// use serde_json::{json, Value};
    /// use std::rc::Rc;
    ///
    /// struct Badge;
    /// impl Consumer for Badge {
    ///     fn receive_update(&self, update: Value) {
    ///         assert_eq!(update, json!({"name": "Victor"}));
    ///     }
    /// }
    ///
    /// let store = TreeStore::initialize(json!({"account": {"name": "Mike"}}))?;
    /// let badge = Rc::new(Badge);
    /// let registration = store.register(badge.clone(), &["account.name as name"])?;
    /// assert_eq!(registration.initial_state, json!({"name": "Mike"}));
    ///
    /// store.set("account.name", json!("Victor"))?;
    /// # Ok::<(), statespace_core::StoreError>(())
    /// ```
    pub fn register(
        &self,
        consumer: Rc<dyn Consumer>,
        specs: &[&str],
    ) -> Result<Registration, StoreError> {
        let parsed = specs
            .iter()
            .map(|raw| RegistrationSpec::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let subscriber = SubscriberId::mint();
        let weak = Rc::downgrade(&consumer);
        let mut inner = self.inner.borrow_mut();
        for spec in &parsed {
            resolver::resolve(&inner.root, &spec.path)?;
        }
        let mut initial_state = Value::Object(Map::new());
        if parsed.is_empty() {
            attach_listener(
                &mut inner.root,
                ListenerKey {
                    subscriber,
                    alias: None,
                },
                weak,
            );
            initial_state = inner.root.snapshot();
            debug!("Registered consumer {} for the whole tree", subscriber);
        } else {
            for spec in &parsed {
                let node = resolver::resolve_mut(&mut inner.root, &spec.path)?;
                attach_listener(
                    node,
                    ListenerKey {
                        subscriber,
                        alias: spec.alias.clone(),
                    },
                    weak.clone(),
                );
                let address = spec.alias.as_ref().unwrap_or(&spec.path);
                assign_at(&mut initial_state, address.segments(), node.snapshot());
            }
            debug!(
                "Registered consumer {} for {} path(s)",
                subscriber,
                parsed.len()
            );
        }
        Ok(Registration {
            subscriber,
            initial_state,
        })
    }

    /// Removes every listener entry of a registered consumer, parked
    /// copies included. Idempotent.
    pub fn unregister(&self, subscriber: SubscriberId) {
        let mut inner = self.inner.borrow_mut();
        let StoreInner { root, orphans, .. } = &mut *inner;
        detach_subscriber(root, subscriber);
        orphans.purge_id(subscriber);
        debug!("Unregistered subscriber {}", subscriber);
    }

    /// Fires `callback` whenever a value at or under `path` is
    /// written. Coverage is copied over the nodes present right now;
    /// keys added later are not covered. Nodes rebuilt in place keep
    /// their coverage, whether by leaf promotion or by a delete
    /// followed by an add at the same path.
    pub fn add_observer(
        &self,
        path: &str,
        callback: impl Fn() + 'static,
    ) -> Result<Subscription, StoreError> {
        self.observe_paths(&[path], Rc::new(callback))
    }

    /// One callback observing several paths at once, fired at most
    /// once per mutation no matter how many of them changed.
    pub fn observe_all(
        &self,
        paths: &[&str],
        callback: impl Fn() + 'static,
    ) -> Result<Subscription, StoreError> {
        self.observe_paths(paths, Rc::new(callback))
    }

    fn observe_paths(
        &self,
        paths: &[&str],
        callback: Rc<ObserverFn>,
    ) -> Result<Subscription, StoreError> {
        let parsed = paths
            .iter()
            .map(|raw| PropertyPath::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let id = SubscriberId::mint();
        let mut inner = self.inner.borrow_mut();
        for path in &parsed {
            resolver::resolve(&inner.root, path)?;
        }
        for path in &parsed {
            let node = resolver::resolve_mut(&mut inner.root, path)?;
            attach_observer(node, id, callback.clone());
        }
        debug!("Observer {} attached to {} path(s)", id, parsed.len());
        Ok(Subscription::new(Rc::downgrade(&self.inner), id))
    }

    /// Binds `publish` to the node at `path`: it receives a fresh
    /// snapshot of the subtree after every mutation that changes
    /// anything under it, and a final null if the node is deleted.
    /// Returns the current snapshot alongside the subscription.
    pub fn bind_value(
        &self,
        path: &str,
        publish: impl Fn(Value) + 'static,
    ) -> Result<(Value, Subscription), StoreError> {
        let parsed = PropertyPath::parse(path)?;
        let id = SubscriberId::mint();
        let mut inner = self.inner.borrow_mut();
        let node = resolver::resolve_mut(&mut inner.root, &parsed)?;
        node.subs.bindings.insert(id, Rc::new(publish));
        let snapshot = node.snapshot();
        debug!("Bound value publisher {} at {}", id, parsed);
        Ok((snapshot, Subscription::new(Rc::downgrade(&self.inner), id)))
    }

    /// Registers a named action. Re-registering a name replaces the
    /// previous handler.
    pub fn add_action(
        &self,
        name: &str,
        handler: impl Fn(&TreeStore, Option<Value>) -> Result<Value, StoreError> + 'static,
    ) {
        self.inner.borrow_mut().actions.insert(name, Rc::new(handler));
    }

    /// Registers a batch of named actions in one call.
    pub fn add_actions(&self, actions: Vec<(&str, ActionHandler)>) {
        let mut inner = self.inner.borrow_mut();
        for (name, handler) in actions {
            inner.actions.insert(name, handler);
        }
    }

    /// Invokes a registered action with an optional payload. The
    /// handler runs outside any store borrow, so it can read and
    /// mutate freely.
    ///
    /// # Examples
    ///
    /// ```
    /// use statespace_core::{require_payload, TreeStore};
    /// use serde_json::json;
    ///
    /// let store = TreeStore::initialize(json!({"counter": 0}))?;
    /// store.add_action("bump", |store, payload| {
    ///     let by = require_payload("bump", payload)?;
    ///     let current = store.get("counter")?;
    ///     let next = json!(current.as_i64().unwrap_or(0) + by.as_i64().unwrap_or(0));
    ///     store.set("counter", next.clone())?;
    ///     Ok(next)
    /// });
    ///
    /// assert_eq!(store.call_action("bump", Some(json!(3)))?, json!(3));
    /// assert_eq!(store.get("counter")?, json!(3));
    /// # Ok::<(), statespace_core::StoreError>(())
    /// ```
    pub fn call_action(&self, name: &str, payload: Option<Value>) -> Result<Value, StoreError> {
        let handler = self.inner.borrow().actions.get(name)?;
        debug!("Calling action '{}'", name);
        handler(self, payload)
    }

    /// Total listener, observer and binding entries currently seated
    /// on tree nodes.
    #[cfg(test)]
    pub(crate) fn subscription_entry_count(&self) -> usize {
        use crate::store::node::NodeValue;
        fn count(node: &PropertyNode) -> usize {
            let mut total = node.subs.listeners.len()
                + node.subs.observers.len()
                + node.subs.bindings.len();
            if let NodeValue::Branch(children) = &node.value {
                for child in children.values() {
                    total += count(child);
                }
            }
            total
        }
        count(&self.inner.borrow().root)
    }

    #[cfg(test)]
    pub(crate) fn parked_set_count(&self) -> usize {
        self.inner.borrow().orphans.parked_count()
    }

    /// Drains a committed batch: listener updates first, then binding
    /// refreshes, then observers. Live refreshes re-snapshot under a
    /// short borrow so they publish whatever re-entrant callbacks left
    /// behind; consumers that were dropped are unregistered on the
    /// way.
    fn deliver(&self, batch: NotificationBatch) {
        if batch.is_empty() {
            return;
        }
        let (updates, refreshes, observers) = batch.into_parts();
        let mut dead: Vec<SubscriberId> = Vec::new();
        for (id, consumer, partial) in updates {
            match consumer.upgrade() {
                Some(consumer) => consumer.receive_update(partial),
                None => dead.push(id),
            }
        }
        for (value, publish) in refreshes {
            match value {
                RefreshValue::Live(path) => {
                    let snapshot = {
                        let inner = self.inner.borrow();
                        resolver::resolve(&inner.root, &path)
                            .ok()
                            .map(|node| node.snapshot())
                    };
                    if let Some(snapshot) = snapshot {
                        publish(snapshot);
                    }
                }
                RefreshValue::Final(value) => publish(value),
            }
        }
        for callback in observers {
            callback();
        }
        if !dead.is_empty() {
            debug!("Pruning {} dropped consumer(s)", dead.len());
            for id in dead {
                self.unregister(id);
            }
        }
    }
}

impl fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_rejects_non_object() {
        let err = TreeStore::initialize(json!([1, 2])).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        // a failed initialize must not burn the thread's slot
        let store = TreeStore::initialize(json!({"ok": true}));
        assert!(store.is_ok());
    }

    #[test]
    fn test_second_store_waits_for_first_to_drop() {
        let first = TreeStore::initialize(json!({})).unwrap();
        let err = TreeStore::initialize(json!({})).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInitialized));

        drop(first);
        assert!(TreeStore::initialize(json!({})).is_ok());
    }

    #[test]
    fn test_clones_share_one_tree() {
        let store = TreeStore::initialize(json!({"n": 1})).unwrap();
        let other = store.clone();
        other.set("n", json!(2)).unwrap();
        assert_eq!(store.get("n").unwrap(), json!(2));
    }

    #[test]
    fn test_get_rejects_missing_and_malformed_paths() {
        let store = TreeStore::initialize(json!({"a": {"b": 1}})).unwrap();
        assert!(matches!(
            store.get("a.c").unwrap_err(),
            StoreError::PathNotFound { .. }
        ));
        assert!(matches!(
            store.get("a..b").unwrap_err(),
            StoreError::InvalidPath(_)
        ));
    }
}
