//! Named action registry.
//!
//! Actions are closures registered under a name and invoked through
//! the store, so application logic that mutates several paths can be
//! bundled behind one call site. Handlers receive the store itself and
//! an optional payload and may call every store operation re-entrantly.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::warn;

use super::tree_store::TreeStore;
use crate::store::StoreError;

/// Signature every registered action satisfies.
pub type ActionFn = dyn Fn(&TreeStore, Option<Value>) -> Result<Value, StoreError>;

/// Shared handle to a registered action.
pub type ActionHandler = Rc<ActionFn>;

/// Unwraps the payload of an action that cannot run without one.
///
/// # Examples
///
/// ```
/// use statespace_core::{require_payload, StoreError};
/// use serde_json::json;
///
/// let value = require_payload("update_account", Some(json!({"name": "Mike"})))?;
/// assert_eq!(value["name"], json!("Mike"));
///
/// let err = require_payload("update_account", None).unwrap_err();
/// assert!(matches!(err, StoreError::MissingArgument { .. }));
/// # Ok::<(), StoreError>(())
/// ```
pub fn require_payload(action: &str, payload: Option<Value>) -> Result<Value, StoreError> {
    payload.ok_or_else(|| StoreError::missing_argument(action))
}

/// Name-to-handler map behind [`TreeStore::add_action`].
#[derive(Default)]
pub(crate) struct ActionRegistry {
    actions: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    /// Registers a handler, replacing any previous one under the name.
    pub(crate) fn insert(&mut self, name: impl Into<String>, handler: ActionHandler) {
        let name = name.into();
        if self.actions.insert(name.clone(), handler).is_some() {
            warn!("Action '{}' re-registered, previous handler dropped", name);
        }
    }

    /// Clones the handler out so the caller can invoke it without
    /// holding any borrow of the registry.
    pub(crate) fn get(&self, name: &str) -> Result<ActionHandler, StoreError> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::unknown_action(name))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}
