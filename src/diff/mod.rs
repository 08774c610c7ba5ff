//! Structural diffing between snapshots.
//!
//! Traversal is deterministic: object keys follow the previous value's
//! insertion order, then keys only present in the current value; arrays are
//! walked by ascending index. Repeated diffs of equal inputs yield identical
//! entry sequences.

use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One step in a diff path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "[{}]", i),
            PathSegment::Key(k) => write!(f, ".{}", k),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Kind of structural change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffKind {
    Added,
    Removed,
    Changed,
}

/// A single difference located by its path from the snapshot root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Empty for a change at the root.
    pub path: Vec<PathSegment>,
    pub kind: DiffKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

impl DiffEntry {
    /// Dotted rendering of the path, `$` for the root.
    pub fn path_string(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.path {
            out.push_str(&segment.to_string());
        }
        out
    }
}

/// Diff two snapshots, stopping after `max_entries` entries.
///
/// Returns nothing when either side lacks a structured tree.
pub fn diff_snapshots(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    max_entries: usize,
) -> Vec<DiffEntry> {
    match (
        previous.and_then(|p| p.structured.as_ref()),
        current.structured.as_ref(),
    ) {
        (Some(before), Some(after)) => diff_values(before, after, max_entries),
        _ => Vec::new(),
    }
}

/// Diff two JSON trees, stopping after `max_entries` entries.
pub fn diff_values(previous: &Value, current: &Value, max_entries: usize) -> Vec<DiffEntry> {
    let mut walker = DiffWalker {
        entries: Vec::new(),
        max_entries,
        path: Vec::new(),
    };
    walker.walk(Some(previous), Some(current));
    walker.entries
}

/// Deep structural equality.
///
/// Objects compare by key set and per-key values regardless of key order,
/// arrays element-wise, everything else by primitive equality.
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| deep_equals(v, other)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equals(l, r))
        }
        _ => a == b,
    }
}

struct DiffWalker {
    entries: Vec<DiffEntry>,
    max_entries: usize,
    path: Vec<PathSegment>,
}

impl DiffWalker {
    fn full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    fn push(&mut self, kind: DiffKind, before: Option<&Value>, after: Option<&Value>) {
        self.entries.push(DiffEntry {
            path: self.path.clone(),
            kind,
            before: before.cloned(),
            after: after.cloned(),
        });
    }

    fn walk(&mut self, previous: Option<&Value>, current: Option<&Value>) {
        if self.full() {
            return;
        }

        let previous = previous.filter(|v| !v.is_null());
        let current = current.filter(|v| !v.is_null());

        match (previous, current) {
            (None, None) => {}
            (None, Some(after)) => self.push(DiffKind::Added, None, Some(after)),
            (Some(before), None) => self.push(DiffKind::Removed, Some(before), None),
            (Some(before), Some(after)) if deep_equals(before, after) => {}
            (Some(Value::Object(before)), Some(Value::Object(after))) => {
                let keys = before
                    .keys()
                    .chain(after.keys().filter(|k| !before.contains_key(*k)));
                for key in keys {
                    if self.full() {
                        break;
                    }
                    self.path.push(PathSegment::Key(key.clone()));
                    self.walk(before.get(key), after.get(key));
                    self.path.pop();
                }
            }
            (Some(Value::Array(before)), Some(Value::Array(after))) => {
                for index in 0..before.len().max(after.len()) {
                    if self.full() {
                        break;
                    }
                    self.path.push(PathSegment::Index(index));
                    self.walk(before.get(index), after.get(index));
                    self.path.pop();
                }
            }
            (Some(before), Some(after)) => self.push(DiffKind::Changed, Some(before), Some(after)),
        }
    }
}
