//! Normalization of state values into JSON-safe snapshots.

use super::value::StateValue;
use crate::config::TimelineConfig;
use chrono::SecondsFormat;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;

/// Marker substituted for a shared cell already on the recursion path.
pub const CYCLE_MARKER: &str = "<cycle>";

/// Marker substituted for collections beyond the depth limit.
pub const MAX_DEPTH_MARKER: &str = "<max-depth>";

/// Default character budget for summaries.
pub const DEFAULT_SUMMARY_CHARS: usize = 200;

/// Normalized, immutable view of a state value at one instant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// The value the snapshot was built from. Not serialized.
    #[serde(skip)]
    pub raw: Option<StateValue>,

    /// JSON tree, `None` when normalization failed.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured: Option<Value>,

    /// Pretty-printed `structured`.
    #[serde(rename = "pretty", default, skip_serializing_if = "Option::is_none")]
    pub pretty_text: Option<String>,

    /// Short description, always populated for built snapshots.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

/// Keeps an explicit JSON `null` as `Some(Value::Null)`.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.structured == other.structured
            && self.pretty_text == other.pretty_text
            && self.summary == other.summary
    }
}

impl Snapshot {
    /// Build with the default summary budget.
    pub fn build(value: &StateValue, max_depth: usize) -> Self {
        SnapshotBuilder::new(max_depth, DEFAULT_SUMMARY_CHARS).build(value)
    }

    /// Snapshot of an already JSON-shaped value.
    pub fn from_json(value: Value) -> Self {
        SnapshotBuilder::default().build(&StateValue::from(value))
    }

    pub fn is_structured(&self) -> bool {
        self.structured.is_some()
    }
}

/// Why normalization gave up on a value.
#[derive(Debug)]
struct Unrepresentable;

/// Normalizes [`StateValue`]s into [`Snapshot`]s.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotBuilder {
    max_depth: usize,
    summary_max_chars: usize,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::from_config(&TimelineConfig::default())
    }
}

impl SnapshotBuilder {
    pub fn new(max_depth: usize, summary_max_chars: usize) -> Self {
        Self {
            max_depth,
            summary_max_chars,
        }
    }

    pub fn from_config(config: &TimelineConfig) -> Self {
        Self::new(config.max_snapshot_depth, config.summary_max_chars)
    }

    /// Build a snapshot. Never fails: values that cannot be normalized keep
    /// only their summary.
    pub fn build(&self, value: &StateValue) -> Snapshot {
        let mut visiting = HashSet::new();
        let structured = self.normalize(value, 0, &mut visiting).ok();

        let pretty_text = structured
            .as_ref()
            .and_then(|v| serde_json::to_string_pretty(v).ok());

        let summary_source = match &structured {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => fallback_summary(value),
        };

        Snapshot {
            raw: Some(value.clone()),
            structured,
            pretty_text,
            summary: truncate_summary(&summary_source, self.summary_max_chars),
        }
    }

    fn normalize(
        &self,
        value: &StateValue,
        depth: usize,
        visiting: &mut HashSet<usize>,
    ) -> Result<Value, Unrepresentable> {
        match value {
            StateValue::Null => Ok(Value::Null),
            StateValue::Bool(b) => Ok(Value::Bool(*b)),
            StateValue::Int(i) => Ok(Value::Number((*i).into())),
            StateValue::Float(f) => Ok(Number::from_f64(*f).map_or(Value::Null, Value::Number)),
            StateValue::Text(s) => Ok(Value::String(s.clone())),
            StateValue::Timestamp(t) => Ok(Value::String(
                t.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            StateValue::Enum(tag) => Ok(Value::String(tag.clone())),
            StateValue::Map(entries) => {
                if depth >= self.max_depth {
                    return Ok(Value::String(MAX_DEPTH_MARKER.into()));
                }
                let mut map = Map::with_capacity(entries.len());
                for (key, child) in entries {
                    let key = self.key_string(key, depth, visiting)?;
                    map.insert(key, self.normalize(child, depth + 1, visiting)?);
                }
                Ok(Value::Object(map))
            }
            StateValue::List(items) | StateValue::Set(items) => {
                if depth >= self.max_depth {
                    return Ok(Value::String(MAX_DEPTH_MARKER.into()));
                }
                items
                    .iter()
                    .map(|item| self.normalize(item, depth + 1, visiting))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            StateValue::Shared(cell) => {
                let identity = cell.identity();
                if !visiting.insert(identity) {
                    return Ok(Value::String(CYCLE_MARKER.into()));
                }
                let result = cell.with(|inner| self.normalize(inner, depth, visiting));
                visiting.remove(&identity);
                result
            }
            StateValue::Opaque(opaque) => opaque.to_json().map_err(|_| Unrepresentable),
        }
    }

    fn key_string(
        &self,
        key: &StateValue,
        depth: usize,
        visiting: &mut HashSet<usize>,
    ) -> Result<String, Unrepresentable> {
        Ok(match self.normalize(key, depth + 1, visiting)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

/// Summary for values whose structure could not be normalized. Does not
/// descend into children.
fn fallback_summary(value: &StateValue) -> String {
    match value {
        StateValue::Opaque(opaque) => opaque.describe(),
        StateValue::Map(entries) => format!("Map({} entries)", entries.len()),
        StateValue::List(items) => format!("List({} items)", items.len()),
        StateValue::Set(items) => format!("Set({} items)", items.len()),
        other => other.runtime_type(),
    }
}

/// Cap `text` at `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SharedState;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_primitives_pass_through() {
        let builder = SnapshotBuilder::default();
        assert_eq!(builder.build(&StateValue::Int(3)).structured, Some(json!(3)));
        assert_eq!(builder.build(&StateValue::Null).structured, Some(Value::Null));
        assert_eq!(builder.build(&"hi".into()).summary, "hi");
    }

    #[test]
    fn test_timestamp_and_enum() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let snap = Snapshot::build(
            &StateValue::map([
                ("at", StateValue::from(t)),
                ("mode", StateValue::enumeration("dark")),
            ]),
            8,
        );
        assert_eq!(
            snap.structured,
            Some(json!({"at": "2024-03-01T12:00:00.000Z", "mode": "dark"}))
        );
    }

    #[test]
    fn test_keys_coerced_to_strings() {
        let value = StateValue::map([(StateValue::Int(1), "one"), (StateValue::Bool(true), "yes")]);
        let snap = Snapshot::build(&value, 8);
        assert_eq!(snap.structured, Some(json!({"1": "one", "true": "yes"})));
    }

    #[test]
    fn test_set_becomes_list() {
        let snap = Snapshot::build(&StateValue::set([1, 2]), 8);
        assert_eq!(snap.structured, Some(json!([1, 2])));
    }

    #[test]
    fn test_cycle_marker() {
        let cell = SharedState::new(StateValue::Null);
        cell.set(StateValue::map([
            ("name", StateValue::from("root")),
            ("me", StateValue::Shared(cell.clone())),
        ]));

        let snap = Snapshot::build(&StateValue::Shared(cell), 8);
        assert_eq!(
            snap.structured,
            Some(json!({"name": "root", "me": CYCLE_MARKER}))
        );
    }

    #[test]
    fn test_shared_cell_visited_twice_off_path_is_not_a_cycle() {
        let cell = SharedState::new(StateValue::list([1, 2]));
        let value = StateValue::list([StateValue::Shared(cell.clone()), StateValue::Shared(cell)]);
        let snap = Snapshot::build(&value, 8);
        assert_eq!(snap.structured, Some(json!([[1, 2], [1, 2]])));
    }

    #[test]
    fn test_depth_cap() {
        let nested =
            StateValue::map([("a", StateValue::map([("b", StateValue::map([("c", 1)]))]))]);
        let snap = Snapshot::build(&nested, 2);
        assert_eq!(snap.structured, Some(json!({"a": {"b": MAX_DEPTH_MARKER}})));
    }

    #[test]
    fn test_opaque_round_trip() {
        #[derive(Serialize, Debug)]
        struct Cart {
            items: u32,
        }
        let snap = Snapshot::build(&StateValue::opaque(Cart { items: 2 }), 8);
        assert_eq!(snap.structured, Some(json!({"items": 2})));
    }

    #[test]
    fn test_opaque_failure_degrades_to_summary() {
        let mut grid = HashMap::new();
        grid.insert((1u8, 2u8), 7u8);
        let snap = Snapshot::build(&StateValue::opaque(grid), 8);
        assert!(snap.structured.is_none());
        assert!(snap.pretty_text.is_none());
        assert!(snap.summary.contains('7'));
    }

    #[test]
    fn test_summary_truncated() {
        let long = "x".repeat(500);
        let snap = SnapshotBuilder::new(8, 10).build(&StateValue::from(long));
        assert_eq!(snap.summary.chars().count(), 10);
        assert!(snap.summary.ends_with('…'));
    }

    #[test]
    fn test_null_structured_survives_serde() {
        let snap = Snapshot::build(&StateValue::Null, 8);
        let text = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back.structured, Some(Value::Null));
        assert_eq!(back, snap);
    }
}
