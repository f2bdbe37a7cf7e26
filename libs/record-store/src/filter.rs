//! Record filters

use serde_json::{Map, Value};

use crate::path::values_at;

/// A query over records. Paths are dotted and fan out over arrays, so an
/// equality test against an array field matches when any element is equal.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every record
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    /// No value at the path is in the list; missing paths match
    NotIn(String, Vec<Value>),
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(path.into(), value.into())
    }

    pub fn is_in(path: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(path.into(), values)
    }

    pub fn not_in(path: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::NotIn(path.into(), values)
    }

    pub fn by_id(id: impl Into<Value>) -> Self {
        Filter::Eq("_id".to_string(), id.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut items), f) => {
                items.push(f);
                Filter::And(items)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        let root = Value::Object(record.clone());
        self.matches_value(&root)
    }

    fn matches_value(&self, root: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, expected) => leaves(root, path).any(|v| v == expected),
            Filter::In(path, expected) => leaves(root, path).any(|v| expected.contains(v)),
            Filter::NotIn(path, excluded) => !leaves(root, path).any(|v| excluded.contains(v)),
            Filter::Exists(path, wanted) => {
                let present = values_at(root, path).iter().any(|v| !v.is_null());
                present == *wanted
            }
            Filter::And(items) => items.iter().all(|f| f.matches_value(root)),
            Filter::Or(items) => items.iter().any(|f| f.matches_value(root)),
        }
    }
}

/// Values at a path with terminal arrays flattened one level
fn leaves<'a>(root: &'a Value, path: &str) -> impl Iterator<Item = &'a Value> {
    values_at(root, path).into_iter().flat_map(|v| match v {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![other],
    })
}
