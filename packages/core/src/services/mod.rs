//! Store Services
//!
//! This module contains the public surface of the store:
//!
//! - `TreeStore` - State tree facade: mutations, registration, delivery
//! - `ActionRegistry` - Named application actions invoked through the store
//!
//! Services own the staged mutate-then-deliver cycle; everything under
//! `crate::store` runs inside the borrow they manage.

pub mod actions;
pub mod tree_store;

pub use actions::{require_payload, ActionFn, ActionHandler};
pub use tree_store::{Registration, SetOptions, Subscription, TreeStore};

#[cfg(test)]
mod tree_store_test;
