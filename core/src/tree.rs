//! Path-addressed operations over a JSON document tree.
//!
//! Paths are `/`-separated. Writing `null` deletes a node, and objects left
//! empty by a delete are pruned, so "absent" and "null" read the same.

use serde_json::{Map, Value};

use crate::error::{TrackerError, TrackerResult};

const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// Split a path into its segments, rejecting characters that cannot appear
/// in a key.
pub fn segments(path: &str) -> TrackerResult<Vec<&str>> {
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(bad) = segs.iter().find(|s| s.contains(FORBIDDEN)) {
        return Err(TrackerError::InvalidInput(format!(
            "Invalid key '{bad}' in path '{path}'"
        )));
    }
    Ok(segs)
}

/// Normalise a path to its canonical `a/b/c` form.
pub fn normalize(path: &str) -> TrackerResult<String> {
    Ok(segments(path)?.join("/"))
}

/// True when one path is an ancestor of (or equal to) the other, i.e. a
/// write to one can change what a reader of the other sees.
#[must_use]
pub fn overlaps(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let b: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

#[must_use]
pub fn get<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object()?.get(*seg)?;
    }
    if node.is_null() { None } else { Some(node) }
}

/// Replace the node at `segs` with `value`.
pub fn set(root: &mut Value, segs: &[&str], value: Value) {
    set_at(root, segs, prune(value));
}

/// Write each field of `fields` below `segs`, leaving siblings untouched.
/// Field keys may themselves be relative paths.
pub fn update(root: &mut Value, segs: &[&str], fields: Map<String, Value>) -> TrackerResult<()> {
    for (key, value) in fields {
        let mut full: Vec<&str> = segs.to_vec();
        full.extend(segments(&key)?);
        set(root, &full, value);
    }
    Ok(())
}

fn set_at(node: &mut Value, segs: &[&str], value: Value) {
    let Some((first, rest)) = segs.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry((*first).to_string()).or_insert(Value::Null);
        set_at(child, rest, value);
        if child.is_null() {
            map.remove(*first);
        }
    }
    if node.as_object().is_some_and(Map::is_empty) {
        *node = Value::Null;
    }
}

/// Drop null members and empty objects, bottom up.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}
