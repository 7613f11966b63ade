//! Tagged JSON value helpers used at validation/template boundaries.
//!
//! Per the design notes, `serde_json::Value` is only handled as an opaque
//! value at the JSON edge (event payloads, run parameters, metadata).
//! Everywhere else, typed structs carry the data. This module provides the
//! one place that walks a dotted/bracketed path over a `Value`, used by
//! both predicate evaluation (§4.7) and template rendering.

use serde_json::Value;

/// Resolve a `jsonPath`-style dotted path (e.g. `payload.repo.name` or
/// `payload.items[0].id`) against a JSON value. Returns `None` if any
/// segment is missing; this is distinct from a present `null`.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for raw_segment in split_path(path) {
        match raw_segment {
            Segment::Key(key) => {
                current = current.as_object()?.get(key)?;
            }
            Segment::Index(idx) => {
                current = current.as_array()?.get(idx)?;
            }
        }
    }
    Some(current)
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Split `a.b[0].c` into `[Key("a"), Key("b"), Index(0), Key("c")]`.
fn split_path(path: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        if dotted.is_empty() {
            continue;
        }
        let mut rest = dotted;
        if let Some(bracket) = rest.find('[') {
            if bracket > 0 {
                segments.push(Segment::Key(&rest[..bracket]));
            }
            rest = &rest[bracket..];
            while let Some(stripped) = rest.strip_prefix('[') {
                if let Some(end) = stripped.find(']') {
                    if let Ok(idx) = stripped[..end].parse::<usize>() {
                        segments.push(Segment::Index(idx));
                    }
                    rest = &stripped[end + 1..];
                } else {
                    break;
                }
            }
        } else {
            segments.push(Segment::Key(rest));
        }
    }
    segments
}

/// Whether `value` equals any entry of `candidates` using JSON equality.
pub fn value_in(value: &Value, candidates: &[Value]) -> bool {
    candidates.iter().any(|c| c == value)
}

/// Loose string rendering of a JSON scalar, used by predicate comparisons
/// and template substitution when the underlying value isn't a string.
pub fn as_comparable_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_key_path() {
        let root = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get_path(&root, "a.b.c"), Some(&json!(42)));
    }

    #[test]
    fn resolves_array_index() {
        let root = json!({"items": [{"id": "x"}, {"id": "y"}]});
        assert_eq!(get_path(&root, "items[1].id"), Some(&json!("y")));
    }

    #[test]
    fn missing_segment_is_none() {
        let root = json!({"a": 1});
        assert_eq!(get_path(&root, "a.b"), None);
    }

    #[test]
    fn dollar_prefixed_path_strips_root_marker() {
        let root = json!({"a": 1});
        assert_eq!(get_path(&root, "$.a"), Some(&json!(1)));
    }
}
