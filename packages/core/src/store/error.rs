//! Error types for state tree operations.
//!
//! Every mutating entrypoint validates before mutating: any error here
//! means the tree is unchanged and nothing was delivered.

use thiserror::Error;

use crate::models::path::PathError;

/// Errors surfaced by the state tree and the action registry.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed path or registration-spec text.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// Well-formed path that does not resolve on the current tree
    /// shape, including paths that step through a leaf.
    #[error("path '{path}' does not resolve on the current tree")]
    PathNotFound { path: String },

    /// Add-property over an existing final segment.
    #[error("property '{path}' already exists")]
    DuplicateProperty { path: String },

    /// An operation requiring an object node targeted a leaf:
    /// add-property under a leaf parent, or clear-property on a leaf.
    #[error("property '{path}' is not an object and cannot hold children")]
    NotAnObject { path: String },

    /// Payload shape structurally incompatible with the target.
    #[error("cannot write {actual} at '{path}': expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// An action requiring a payload was invoked without one.
    #[error("action '{action}' requires a payload argument")]
    MissingArgument { action: String },

    /// Calling an action nobody registered.
    #[error("no action registered under '{name}'")]
    UnknownAction { name: String },

    /// A second live store on the same thread.
    #[error("a state tree is already live on this thread")]
    AlreadyInitialized,
}

impl StoreError {
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    pub fn duplicate_property(path: impl Into<String>) -> Self {
        Self::DuplicateProperty { path: path.into() }
    }

    pub fn not_an_object(path: impl Into<String>) -> Self {
        Self::NotAnObject { path: path.into() }
    }

    pub fn type_mismatch(
        path: impl Into<String>,
        expected: &'static str,
        actual: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            expected,
            actual,
        }
    }

    pub fn missing_argument(action: impl Into<String>) -> Self {
        Self::MissingArgument {
            action: action.into(),
        }
    }

    pub fn unknown_action(name: impl Into<String>) -> Self {
        Self::UnknownAction { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_error_converts_to_invalid_path() {
        let parse_err = crate::models::path::PropertyPath::parse("").unwrap_err();
        let err: StoreError = parse_err.into();
        assert!(matches!(err, StoreError::InvalidPath(PathError::Empty)));
    }

    #[test]
    fn test_messages_name_the_offending_path() {
        let err = StoreError::path_not_found("account.missing");
        assert_eq!(
            err.to_string(),
            "path 'account.missing' does not resolve on the current tree"
        );
        let err = StoreError::type_mismatch("account", "object or null", "number");
        assert_eq!(
            err.to_string(),
            "cannot write number at 'account': expected object or null"
        );
    }
}
