//! JSON command state machine.
//!
//! Requests are terse JSON objects (or arrays of objects) whose keys route
//! to subsystem handlers. Responses echo the request with results written
//! back in place, plus a status code. The same schema serves reads and
//! writes: an empty-string value at a leaf key is a query, anything else
//! an assignment.
//!
//! Long operations never block the dispatcher; they return a busy status
//! and are polled again on the next external call with the same key
//! context. See [`dispatch::Dispatcher`] for the state transitions.

mod axes;
mod command;
mod dispatch;
mod fields;
mod motion;
mod ops;
mod peripherals;

pub use command::Command;
pub use dispatch::Dispatcher;

use serde_json::Value;

/// A JSON object with insertion-ordered keys. Key order is part of the
/// protocol: handlers run in it, and a later field may depend on an
/// earlier field's side effect.
pub type JsonMap = serde_json::Map<String, Value>;

/// True for the empty-string query marker.
#[inline]
pub(crate) fn is_query(v: &Value) -> bool {
    matches!(v, Value::String(s) if s.is_empty())
}

/// If `obj[key]` is a query, replace it with a nested object mapping every
/// recognized child key to the query marker, so "give me the group" turns
/// into "query every field". Returns true when the expansion happened.
pub(crate) fn expand_query(obj: &mut JsonMap, key: &str, children: &[&str]) -> bool {
    let expand = matches!(obj.get(key), Some(v) if is_query(v));
    if expand {
        let mut node = JsonMap::new();
        for child in children {
            node.insert((*child).to_string(), Value::String(String::new()));
        }
        obj.insert(key.to_string(), Value::Object(node));
    }
    expand
}

/// Key snapshot for iterate-while-mutating loops. Handlers replace values
/// but never remove keys, so the snapshot stays valid.
pub(crate) fn key_list(obj: &JsonMap) -> Vec<String> {
    obj.keys().cloned().collect()
}

/// Child-key alias match with a one-character group prefix: `en` also
/// answers to `xen`.
pub(crate) fn is_axis_key(key: &str, name: &str) -> bool {
    key == name || (key.len() == name.len() + 1 && key.ends_with(name))
}

/// Child-key alias match with a named group prefix: `mv` also answers to
/// `sysmv`.
pub(crate) fn is_group_key(key: &str, group: &str, name: &str) -> bool {
    if key == name {
        return true;
    }
    key.len() == group.len() + name.len() && key.starts_with(group) && key.ends_with(name)
}

/// Final byte of a key as a subslice, or empty when the key ends in a
/// multi-byte character (no motor or axis name does).
pub(crate) fn last_char_suffix(key: &str) -> &str {
    key.get(key.len().saturating_sub(1)..).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand_query_replaces_marker() {
        let mut obj = json!({"sys": ""}).as_object().unwrap().clone();
        assert!(expand_query(&mut obj, "sys", &["mv", "tv"]));
        let kid = obj["sys"].as_object().unwrap();
        assert_eq!(kid.len(), 2);
        assert!(is_query(&kid["mv"]));
    }

    #[test]
    fn test_expand_query_leaves_assignments() {
        let mut obj = json!({"sys": {"mv": 100}}).as_object().unwrap().clone();
        assert!(!expand_query(&mut obj, "sys", &["mv", "tv"]));
        assert_eq!(obj["sys"]["mv"], 100);
    }

    #[test]
    fn test_alias_matching() {
        assert!(is_axis_key("en", "en"));
        assert!(is_axis_key("xen", "en"));
        assert!(!is_axis_key("xyen", "en"));
        assert!(is_group_key("mv", "sys", "mv"));
        assert!(is_group_key("sysmv", "sys", "mv"));
        assert!(!is_group_key("dpymv", "sys", "mv"));
    }
}
