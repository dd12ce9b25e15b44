//! Fresh root-to-node path resolution.
//!
//! Nothing caches node pointers: consumers hold paths, and every
//! operation re-walks from the root against the current shape.

use super::error::StoreError;
use super::node::{NodeValue, PropertyNode};
use crate::models::path::PropertyPath;

/// Walks `path` from `root`. Stepping through a leaf fails the same
/// way a missing segment does: the path does not resolve.
pub(crate) fn resolve<'a>(
    root: &'a PropertyNode,
    path: &PropertyPath,
) -> Result<&'a PropertyNode, StoreError> {
    let mut current = root;
    for segment in path.segments() {
        let children = match &current.value {
            NodeValue::Branch(children) => children,
            NodeValue::Leaf(_) => return Err(StoreError::path_not_found(path.to_string())),
        };
        current = children
            .get(segment)
            .ok_or_else(|| StoreError::path_not_found(path.to_string()))?;
    }
    Ok(current)
}

pub(crate) fn resolve_mut<'a>(
    root: &'a mut PropertyNode,
    path: &PropertyPath,
) -> Result<&'a mut PropertyNode, StoreError> {
    let mut current = root;
    for segment in path.segments() {
        let children = match &mut current.value {
            NodeValue::Branch(children) => children,
            NodeValue::Leaf(_) => return Err(StoreError::path_not_found(path.to_string())),
        };
        current = children
            .get_mut(segment)
            .ok_or_else(|| StoreError::path_not_found(path.to_string()))?;
    }
    Ok(current)
}

/// Walks pre-split segments below `node`; `None` when the suffix does
/// not resolve. Used when re-seating parked subscriptions inside a
/// freshly built subtree.
pub(crate) fn resolve_segments_mut<'a>(
    node: &'a mut PropertyNode,
    segments: &[String],
) -> Option<&'a mut PropertyNode> {
    let mut current = node;
    for segment in segments {
        let children = match &mut current.value {
            NodeValue::Branch(children) => children,
            NodeValue::Leaf(_) => return None,
        };
        current = children.get_mut(segment)?;
    }
    Some(current)
}

/// Resolves the parent branch of the final segment and hands back the
/// final key. A single-segment path parents at the root.
pub(crate) fn resolve_parent_mut<'a, 'p>(
    root: &'a mut PropertyNode,
    path: &'p PropertyPath,
) -> Result<(&'a mut PropertyNode, &'p str), StoreError> {
    match path.parent() {
        Some(parent) => {
            let node = resolve_mut(root, &parent)?;
            Ok((node, path.leaf()))
        }
        None => Ok((root, path.leaf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> PropertyNode {
        PropertyNode::from_value(json!({
            "account": {"name": "Mike", "address": {"city": "Austin"}},
            "items": [],
        }))
    }

    fn path(raw: &str) -> PropertyPath {
        PropertyPath::parse(raw).unwrap()
    }

    #[test]
    fn test_resolve_walks_to_leaves_and_branches() {
        let root = tree();
        let leaf = resolve(&root, &path("account.address.city")).unwrap();
        assert_eq!(leaf.snapshot(), json!("Austin"));
        let branch = resolve(&root, &path("account")).unwrap();
        assert!(!branch.is_leaf());
    }

    #[test]
    fn test_resolve_missing_segment_is_path_not_found() {
        let root = tree();
        let err = resolve(&root, &path("account.missing")).unwrap_err();
        assert!(matches!(err, StoreError::PathNotFound { .. }));
    }

    #[test]
    fn test_resolve_through_leaf_is_path_not_found() {
        let root = tree();
        let err = resolve(&root, &path("items.0")).unwrap_err();
        assert!(matches!(err, StoreError::PathNotFound { .. }));
    }

    #[test]
    fn test_resolve_parent_of_top_level_is_root() {
        let mut root = tree();
        let items = path("items");
        let (parent, key) = resolve_parent_mut(&mut root, &items).unwrap();
        assert!(!parent.is_leaf());
        assert_eq!(key, "items");
    }

    #[test]
    fn test_resolve_segments_mut_suffix_walk() {
        let mut root = tree();
        let account = resolve_mut(&mut root, &path("account")).unwrap();
        let city = resolve_segments_mut(account, &["address".into(), "city".into()]).unwrap();
        assert_eq!(city.snapshot(), json!("Austin"));
        assert!(resolve_segments_mut(account, &["nope".into()]).is_none());
    }
}
