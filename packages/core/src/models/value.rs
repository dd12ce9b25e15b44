//! Helpers for classifying and assembling plain JSON values.
//!
//! `serde_json::Value` is the value currency at the store boundary.
//! Objects become branches of the tree; everything else, arrays
//! included, is stored atomically as a leaf.

use serde_json::{Map, Value};

use crate::models::path::PropertyPath;

/// True when the value is stored as a single leaf rather than a
/// branch. Arrays are leaves: they are set and delivered atomically.
pub fn is_scalar(value: &Value) -> bool {
    !value.is_object()
}

/// Human-readable shape name used in error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Writes `value` into `target` at the nested location named by
/// `segments`, creating intermediate objects as needed. Writing at a
/// location that already holds a subtree replaces it wholesale.
///
/// Only ever used to assemble fresh partial-state payloads and initial
/// projections, never to mutate the tree itself.
pub fn assign_at(target: &mut Value, segments: &[String], value: Value) {
    if segments.is_empty() {
        *target = value;
        return;
    }
    let mut cursor = target;
    for segment in &segments[..segments.len() - 1] {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let map = match cursor.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        cursor = map.entry(segment.clone()).or_insert(Value::Null);
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    if let Some(map) = cursor.as_object_mut() {
        map.insert(segments[segments.len() - 1].clone(), value);
    }
}

/// Filters `paths` down to the prefix-minimal set: any path that has
/// another member of the set as a prefix (equality included) is
/// dropped. Used when a deleted subtree owes one null per subscriber
/// at the shallowest paths it was listening under.
pub fn prefix_minimal(mut paths: Vec<PropertyPath>) -> Vec<PropertyPath> {
    paths.sort();
    let mut kept: Vec<PropertyPath> = Vec::new();
    for path in paths {
        if !kept.iter().any(|prefix| path.starts_with(prefix)) {
            kept.push(path);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segments(raw: &str) -> Vec<String> {
        raw.split('.').map(str::to_string).collect()
    }

    #[test]
    fn test_is_scalar_treats_arrays_as_leaves() {
        assert!(is_scalar(&json!(null)));
        assert!(is_scalar(&json!(42)));
        assert!(is_scalar(&json!("text")));
        assert!(is_scalar(&json!([1, 2, 3])));
        assert!(!is_scalar(&json!({"a": 1})));
    }

    #[test]
    fn test_value_kind_names() {
        assert_eq!(value_kind(&json!(null)), "null");
        assert_eq!(value_kind(&json!(true)), "boolean");
        assert_eq!(value_kind(&json!(1.5)), "number");
        assert_eq!(value_kind(&json!("x")), "string");
        assert_eq!(value_kind(&json!([])), "array");
        assert_eq!(value_kind(&json!({})), "object");
    }

    #[test]
    fn test_assign_at_builds_intermediates() {
        let mut target = json!({});
        assign_at(&mut target, &segments("person.name"), json!("Victor"));
        assert_eq!(target, json!({"person": {"name": "Victor"}}));
    }

    #[test]
    fn test_assign_at_merges_siblings() {
        let mut target = json!({});
        assign_at(&mut target, &segments("account.name"), json!("Mike"));
        assign_at(&mut target, &segments("account.city"), json!("Austin"));
        assert_eq!(
            target,
            json!({"account": {"name": "Mike", "city": "Austin"}})
        );
    }

    #[test]
    fn test_assign_at_prefix_replaces_subtree() {
        let mut target = json!({});
        assign_at(&mut target, &segments("account.name"), json!("Mike"));
        assign_at(&mut target, &segments("account"), json!(null));
        assert_eq!(target, json!({"account": null}));
    }

    #[test]
    fn test_prefix_minimal_drops_covered_paths() {
        let paths = vec![
            PropertyPath::parse("a.b.c").unwrap(),
            PropertyPath::parse("a.b").unwrap(),
            PropertyPath::parse("x.y").unwrap(),
            PropertyPath::parse("a.b").unwrap(),
        ];
        let minimal = prefix_minimal(paths);
        let rendered: Vec<String> = minimal.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["a.b", "x.y"]);
    }
}
