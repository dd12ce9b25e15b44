//! StateSpace Core State Management Layer
//!
//! This crate provides a shared, mutable, path-addressable state tree
//! with fine-grained change notification for single-threaded
//! applications.
//!
//! # Architecture
//!
//! - **One tree per thread**: dot-separated paths address nodes; object
//!   values are branches, everything else (arrays included) a leaf
//! - **Subscription index on the nodes**: listener, observer and
//!   binding entries live on the nodes they cover, so a mutation finds
//!   its audience without scanning
//! - **Staged delivery**: mutations commit fully, then notify; one
//!   merged update per consumer per mutation, and callbacks may
//!   re-enter the store
//! - **Deletion parks, re-adding revives**: subscriptions on deleted
//!   subtrees wait under their old path for the shape to come back
//!
//! # Modules
//!
//! - [`models`] - Paths, registration specs and value helpers
//! - [`store`] - Tree nodes, subscription index and mutation engine
//! - [`services`] - The `TreeStore` facade and the action registry
//!
//! # Examples
//!
//! ```
//! use statespace_core::{SetOptions, TreeStore};
//! use serde_json::json;
//!
//! let store = TreeStore::initialize(json!({
//!     "account": {"name": "Mike", "address": {"city": "Austin"}}
//! }))?;
//!
//! let fired = std::rc::Rc::new(std::cell::Cell::new(0));
//! let counter = fired.clone();
//! let _watch = store.add_observer("account.name", move || {
//!     counter.set(counter.get() + 1);
//! })?;
//!
//! store.set("account.name", json!("Victor"))?;
//! assert_eq!(fired.get(), 1);
//!
//! store.set_with("account", json!({"name": "Ada"}), SetOptions::replace())?;
//! assert_eq!(store.get("account")?, json!({"name": "Ada"}));
//! # Ok::<(), statespace_core::StoreError>(())
//! ```

pub mod models;
pub mod services;
pub mod store;

// Re-export the public surface
pub use models::{PathError, PropertyPath, RegistrationSpec};
pub use services::{
    require_payload, ActionFn, ActionHandler, Registration, SetOptions, Subscription, TreeStore,
};
pub use store::{BindingFn, Consumer, ObserverFn, StoreError, SubscriberId};
