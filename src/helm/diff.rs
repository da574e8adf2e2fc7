//! Drift detection between a live release and a dry-run rendering
//!
//! Manifests are compared object by object (keyed on kind, namespace and
//! name) after YAML parsing, so formatting and document order do not count
//! as drift. User-supplied values are compared leaf by leaf.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::Release;
use crate::models::Values;

/// Describe every difference between `current` and `desired`.
///
/// Returns an empty string when the two renderings are equivalent.
pub fn diff(current: &Release, desired: &Release) -> String {
    let mut lines = Vec::new();

    let before = manifest_objects(&current.manifest);
    let after = manifest_objects(&desired.manifest);
    for (key, old) in &before {
        match after.get(key) {
            None => lines.push(format!("- {}", key)),
            Some(new) if new != old => lines.push(format!("~ {}", key)),
            Some(_) => {}
        }
    }
    for key in after.keys() {
        if !before.contains_key(key) {
            lines.push(format!("+ {}", key));
        }
    }

    let mut old_leaves = BTreeMap::new();
    flatten("values", &current.config, &mut old_leaves);
    let mut new_leaves = BTreeMap::new();
    flatten("values", &desired.config, &mut new_leaves);
    for (path, old) in &old_leaves {
        match new_leaves.get(path) {
            None => lines.push(format!("- {}", path)),
            Some(new) if new != old => lines.push(format!("~ {}: {} -> {}", path, old, new)),
            Some(_) => {}
        }
    }
    for (path, new) in &new_leaves {
        if !old_leaves.contains_key(path) {
            lines.push(format!("+ {}: {}", path, new));
        }
    }

    lines.join("\n")
}

fn manifest_objects(manifest: &str) -> BTreeMap<String, Values> {
    let mut objects = BTreeMap::new();
    for (index, document) in serde_yaml::Deserializer::from_str(manifest).enumerate() {
        let parsed = match serde_yaml::Value::deserialize(document) {
            Ok(v) => Values::from(v),
            Err(e) => {
                // Keep unparsable documents comparable by position.
                tracing::debug!(index, error = %e, "Unparsable manifest document");
                objects.insert(format!("document[{}]", index), Values::Null);
                continue;
            }
        };
        if parsed == Values::Null {
            continue;
        }
        objects.insert(object_key(&parsed, index), parsed);
    }
    objects
}

fn object_key(object: &Values, index: usize) -> String {
    let kind = object.lookup("kind").and_then(Values::as_str);
    let name = object.lookup("metadata.name").and_then(Values::as_str);
    let namespace = object.lookup("metadata.namespace").and_then(Values::as_str);
    match (kind, name) {
        (Some(kind), Some(name)) => match namespace {
            Some(ns) => format!("{}/{}/{}", kind, ns, name),
            None => format!("{}/{}", kind, name),
        },
        _ => format!("document[{}]", index),
    }
}

fn flatten(prefix: &str, value: &Values, out: &mut BTreeMap<String, String>) {
    match value {
        Values::Map(m) if !m.is_empty() => {
            for (k, v) in m {
                flatten(&format!("{}.{}", prefix, k.replace('.', "\\.")), v, out);
            }
        }
        Values::List(items) if !items.is_empty() => {
            for (i, v) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", prefix, i), v, out);
            }
        }
        Values::Map(_) if prefix == "values" => {}
        leaf => {
            out.insert(prefix.to_string(), leaf.to_string());
        }
    }
}
