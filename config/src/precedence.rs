//! # Configuration Precedence
//!
//! Folds value trees from successive sources into one accumulator.
//!
//! # Merge Policy
//! - branch + branch: recurse
//! - anything else: the incoming value replaces the base value
//!
//! Arrays are atomic: an incoming array replaces the base array wholesale.

use crate::value::{Map, Value};

/// Merge `incoming` into `base`, later values winning on overlapping leaves.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// The single combinator used whenever two value trees meet: defaults and
/// sources, base and local files, environment sections, overrides.
///
/// ## Usage
/// ```rust
/// use config::{Value, deep_merge, map_from_json};
/// use serde_json::json;
///
/// let mut base = map_from_json(json!({"a": 1, "b": {"c": 2}}));
/// deep_merge(&mut base, map_from_json(json!({"b": {"c": 3, "d": 4}})));
///
/// assert_eq!(Value::Map(base).to_json(), json!({"a": 1, "b": {"c": 3, "d": 4}}));
/// ```
pub fn deep_merge(base: &mut Map, incoming: Map) {
    for (key, value) in incoming {
        if let Value::Map(child) = value {
            if let Some(Value::Map(existing)) = base.get_mut(&key) {
                deep_merge(existing, child);
                continue;
            }
            base.insert(key, Value::Map(child));
        } else {
            base.insert(key, value);
        }
    }
}

/// Same as [`deep_merge`], also logging which leaves `source_name` changed.
///
/// Returns the dotted paths of the leaves whose value changed.
pub fn merge_with_logging(base: &mut Map, incoming: Map, source_name: &str) -> Vec<String> {
    let mut changes = Vec::new();
    collect_changes(base, &incoming, None, &mut changes);
    deep_merge(base, incoming);

    if !changes.is_empty() {
        tracing::debug!(source = source_name, changes = ?changes, "Configuration merged");
    }

    changes
}

fn collect_changes(base: &Map, incoming: &Map, prefix: Option<&str>, changes: &mut Vec<String>) {
    for (key, value) in incoming {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match (base.get(key), value) {
            (Some(Value::Map(existing)), Value::Map(child)) => {
                collect_changes(existing, child, Some(&path), changes);
            }
            (Some(existing), value) if existing == value => {}
            _ => changes.push(path),
        }
    }
}
