//! Dotted-path access into JSON documents

use serde_json::{Map, Value};

use crate::error::StoreError;

/// Every value reachable at `path`, fanning out over arrays on the way.
/// Numeric segments index into arrays.
pub fn values_at<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(value, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(child) = items.get(index) {
                    collect(child, rest, out);
                }
            } else {
                for item in items {
                    collect(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// Set `path` to `value`, creating intermediate objects
pub fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), StoreError> {
    let (parent, last) = parent_mut(doc, path, true)?;
    if let Some(parent) = parent {
        parent.insert(last.to_string(), value);
    }
    Ok(())
}

/// Remove `path` if present
pub fn unset_path(doc: &mut Map<String, Value>, path: &str) -> Result<(), StoreError> {
    let (parent, last) = parent_mut(doc, path, false)?;
    if let Some(parent) = parent {
        parent.remove(last);
    }
    Ok(())
}

/// Append `value` to the array at `path` unless already present.
/// Existing entries are never removed.
pub fn add_to_set(doc: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), StoreError> {
    let (parent, last) = parent_mut(doc, path, true)?;
    let Some(parent) = parent else {
        return Ok(());
    };
    let slot = parent
        .entry(last.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => {
            if !items.contains(&value) {
                items.push(value);
            }
            Ok(())
        }
        _ => Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: "not an array".to_string(),
        }),
    }
}

fn parent_mut<'a, 'p>(
    doc: &'a mut Map<String, Value>,
    path: &'p str,
    create: bool,
) -> Result<(Option<&'a mut Map<String, Value>>, &'p str), StoreError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or_default();
    if last.is_empty() {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: "empty segment".to_string(),
        });
    }

    let mut current = doc;
    for segment in segments {
        if !matches!(current.get(segment), Some(Value::Object(_))) {
            if !create {
                return Ok((None, last));
            }
            if !matches!(current.get(segment), None | Some(Value::Null)) {
                return Err(invalid(path, "traverses a non-object"));
            }
            current.insert(segment.to_string(), Value::Object(Map::new()));
        }
        current = match current.get_mut(segment) {
            Some(Value::Object(child)) => child,
            _ => return Err(invalid(path, "traverses a non-object")),
        };
    }
    Ok((Some(current), last))
}

fn invalid(path: &str, reason: &str) -> StoreError {
    StoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Keep `_id` and the listed paths of a record
pub fn project(doc: &Map<String, Value>, fields: &[&str]) -> Map<String, Value> {
    let source = Value::Object(doc.clone());
    let mut out = Value::Object(Map::new());
    for field in fields.iter().chain(std::iter::once(&"_id")) {
        let segments: Vec<&str> = field.split('.').collect();
        copy_path(&source, &mut out, &segments);
    }
    match out {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn copy_path(src: &Value, dst: &mut Value, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        *dst = src.clone();
        return;
    };
    match src {
        Value::Object(map) => {
            let Some(child) = map.get(*head) else {
                return;
            };
            if !dst.is_object() {
                *dst = Value::Object(Map::new());
            }
            if let Value::Object(out) = dst {
                let slot = out.entry(head.to_string()).or_insert(Value::Null);
                copy_path(child, slot, rest);
            }
        }
        Value::Array(items) => {
            let aligned = matches!(dst, Value::Array(existing) if existing.len() == items.len());
            if !aligned {
                *dst = Value::Array(vec![Value::Null; items.len()]);
            }
            if let Value::Array(out) = dst {
                for (item, slot) in items.iter().zip(out.iter_mut()) {
                    copy_path(item, slot, segments);
                }
            }
        }
        _ => {}
    }
}
