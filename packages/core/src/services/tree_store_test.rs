//! Facade mechanics: delivery ordering, re-entrancy, consumer
//! lifetime and subscription cancellation.

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use serde_json::{json, Value};

    use crate::services::tree_store::TreeStore;
    use crate::store::Consumer;

    struct RecordingConsumer {
        updates: RefCell<Vec<Value>>,
    }

    impl RecordingConsumer {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                updates: RefCell::new(Vec::new()),
            })
        }

        fn received(&self) -> Vec<Value> {
            self.updates.borrow().clone()
        }
    }

    impl Consumer for RecordingConsumer {
        fn receive_update(&self, update: Value) {
            self.updates.borrow_mut().push(update);
        }
    }

    fn seed_store() -> TreeStore {
        TreeStore::initialize(json!({
            "account": {
                "name": "Mike",
                "address": {"city": "Austin", "zip": "78701"}
            },
            "dev_mode": false
        }))
        .unwrap()
    }

    #[test]
    fn test_delivery_runs_listeners_then_bindings_then_observers() {
        struct OrderRecorder {
            order: Rc<RefCell<Vec<&'static str>>>,
        }
        impl Consumer for OrderRecorder {
            fn receive_update(&self, _update: Value) {
                self.order.borrow_mut().push("listener");
            }
        }

        let store = seed_store();
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let observed = order.clone();
        let _observer = store
            .add_observer("account.name", move || observed.borrow_mut().push("observer"))
            .unwrap();
        let bound = order.clone();
        let (_initial, _binding) = store
            .bind_value("account.name", move |_| bound.borrow_mut().push("binding"))
            .unwrap();
        let recorder = Rc::new(OrderRecorder {
            order: order.clone(),
        });
        store.register(recorder.clone(), &["account.name"]).unwrap();

        store.set("account.name", json!("Victor")).unwrap();

        assert_eq!(*order.borrow(), vec!["listener", "binding", "observer"]);
    }

    #[test]
    fn test_listener_may_mutate_the_store_reentrantly() {
        struct Chainer {
            store: RefCell<Option<TreeStore>>,
            chained: Cell<bool>,
        }
        impl Consumer for Chainer {
            fn receive_update(&self, _update: Value) {
                if self.chained.replace(true) {
                    return;
                }
                if let Some(store) = self.store.borrow().as_ref() {
                    store.set("dev_mode", json!(true)).unwrap();
                }
            }
        }

        let store = seed_store();
        let chainer = Rc::new(Chainer {
            store: RefCell::new(Some(store.clone())),
            chained: Cell::new(false),
        });
        store.register(chainer.clone(), &["account.name"]).unwrap();

        store.set("account.name", json!("Victor")).unwrap();

        assert!(chainer.chained.get());
        assert_eq!(store.get("dev_mode").unwrap(), json!(true));
    }

    #[test]
    fn test_dropped_consumer_is_pruned_on_next_delivery() {
        let store = seed_store();
        let consumer = RecordingConsumer::new();
        store.register(consumer.clone(), &["dev_mode"]).unwrap();
        assert_eq!(store.subscription_entry_count(), 1);

        drop(consumer);
        store.set("dev_mode", json!(true)).unwrap();

        assert_eq!(store.subscription_entry_count(), 0);
    }

    #[test]
    fn test_unregister_stops_updates_and_drops_entries() {
        let store = seed_store();
        let consumer = RecordingConsumer::new();
        let registration = store.register(consumer.clone(), &["account"]).unwrap();
        assert!(store.subscription_entry_count() > 0);

        store.unregister(registration.subscriber);
        store.set("account.name", json!("Victor")).unwrap();

        assert_eq!(store.subscription_entry_count(), 0);
        assert!(consumer.received().is_empty());
    }

    #[test]
    fn test_cancelled_observer_stays_quiet() {
        let store = seed_store();
        let fired = Rc::new(Cell::new(0u32));
        let counter = fired.clone();
        let subscription = store
            .add_observer("dev_mode", move || counter.set(counter.get() + 1))
            .unwrap();

        store.set("dev_mode", json!(true)).unwrap();
        assert_eq!(fired.get(), 1);

        subscription.cancel();
        subscription.cancel();
        store.set("dev_mode", json!(false)).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_cancel_purges_parked_copies() {
        let store = seed_store();
        let fired = Rc::new(Cell::new(0u32));
        let counter = fired.clone();
        let subscription = store
            .add_observer("account.address.city", move || counter.set(counter.get() + 1))
            .unwrap();

        store.delete_property("account.address.city").unwrap();
        assert_eq!(store.parked_set_count(), 1);

        subscription.cancel();
        assert_eq!(store.parked_set_count(), 0);

        store
            .add_property("account.address.city", json!("Denver"))
            .unwrap();
        store.set("account.address.city", json!("Boise")).unwrap();
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_cancel_after_store_drop_is_harmless() {
        let store = TreeStore::initialize(json!({"x": 1})).unwrap();
        let subscription = store.add_observer("x", || {}).unwrap();

        drop(store);
        subscription.cancel();
    }

    #[test]
    fn test_dropping_subscription_handle_cancels_it() {
        let store = seed_store();
        let fired = Rc::new(Cell::new(0u32));
        let counter = fired.clone();
        {
            let _subscription = store
                .add_observer("dev_mode", move || counter.set(counter.get() + 1))
                .unwrap();
            store.set("dev_mode", json!(true)).unwrap();
        }
        store.set("dev_mode", json!(false)).unwrap();

        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_action_handler_mutates_through_the_store() {
        let store = seed_store();
        store.add_action("promote_city", |store, _payload| {
            store.set("account.address.city", json!("Denver"))?;
            store.get("account.address.city")
        });

        let result = store.call_action("promote_city", None).unwrap();

        assert_eq!(result, json!("Denver"));
        assert_eq!(store.get("account.address.city").unwrap(), json!("Denver"));
    }
}
