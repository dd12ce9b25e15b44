//! State Tree Storage
//!
//! The tree of [`node::PropertyNode`]s behind the public facade,
//! together with everything that operates on it: path resolution,
//! per-node subscription bookkeeping, the mutation engine and the
//! notification batches mutations hand back for delivery.

pub mod error;
pub(crate) mod events;
pub(crate) mod mutation;
pub(crate) mod node;
pub(crate) mod resolver;
pub(crate) mod subscriptions;

pub use error::StoreError;
pub use subscriptions::{BindingFn, Consumer, ObserverFn, SubscriberId};
