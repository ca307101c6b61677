//! Overlay user settings onto schema defaults.
//!
//! Typed submodules merge key-by-key. The freeform overlay replaces whole
//! values at its dotted insertion points. Nulls are pruned last.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use super::schema::Schema;
use crate::domain::SchemaError;

/// Flat dotted-path overlay applied after the typed settings.
pub type Overlay = BTreeMap<String, Value>;

/// Null-free, schema-checked settings tree.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig(Value);

impl MergedConfig {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_port(&self, path: &str) -> Option<u16> {
        self.get(path)
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }

    /// String items of a list option; non-string items are skipped.
    pub fn get_str_list(&self, path: &str) -> Vec<&str> {
        self.get(path)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Merges user input onto the defaults of a [`Schema`].
pub struct ConfigMerger<'a> {
    schema: &'a Schema,
}

impl<'a> ConfigMerger<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Validate, overlay, prune and re-validate.
    pub fn merge(&self, settings: &Value, overlay: &Overlay) -> Result<MergedConfig, SchemaError> {
        self.schema.check_overrides(settings)?;
        self.schema.check_overlay(overlay.keys())?;

        let mut tree = deep_merge(&self.schema.defaults(), settings);
        apply_overlay(&mut tree, overlay);
        let tree = prune_nulls(tree).unwrap_or_else(|| Value::Object(Map::new()));

        self.schema.check_merged(&tree)?;
        debug!(
            "Merged settings: {} top-level keys, {} overlay keys",
            tree.as_object().map_or(0, Map::len),
            overlay.len()
        );
        Ok(MergedConfig(tree))
    }
}

/// Recursive overlay. Mappings merge key-by-key; any other non-null override
/// replaces the base; null overrides leave the base untouched.
pub fn deep_merge(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (base, Value::Null) => base.clone(),
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in override_map {
                let entry = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        (_, value) => value.clone(),
    }
}

/// Apply each overlay entry as a flat replace at its dotted path.
pub fn apply_overlay(tree: &mut Value, overlay: &Overlay) {
    for (path, value) in overlay {
        set_path(tree, path, value.clone());
    }
}

/// Replace the value at a dotted path, creating intermediate mappings and
/// replacing any non-mapping that is in the way.
pub fn set_path(tree: &mut Value, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = tree;
    for segment in segments {
        current = as_mapping(current)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_mapping(current).insert(last.to_string(), value);
}

fn as_mapping(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with a mapping"),
    }
}

/// Value at a dotted path.
pub fn lookup<'v>(tree: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(tree, |node, segment| node.get(segment))
}

/// Remove null leaves, null list items and mappings left empty by the
/// removal. Returns `None` when the whole value pruned away.
pub fn prune_nulls(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let was_empty = map.is_empty();
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, value)| prune_nulls(value).map(|v| (key, v)))
                .collect();
            if pruned.is_empty() && !was_empty {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        Value::Array(items) => Some(Value::Array(items.into_iter().filter_map(prune_nulls).collect())),
        other => Some(other),
    }
}
