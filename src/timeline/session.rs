//! Session export format and lenient import parsing.

use crate::error::{Result, TimelineError};
use crate::types::{Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Current session format version.
pub const SESSION_VERSION: u32 = 1;

/// A serialized bundle of records, pin state and metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub records: Vec<Record>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pinned_record_ids: Vec<RecordId>,
    pub max_records: usize,
}

impl Session {
    /// Strict parse of a session document. Unlike timeline import, any
    /// malformed record fails the whole document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TimelineError::Deserialization(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What an import did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Records now in the timeline.
    pub imported: usize,
    /// Entries that failed to parse or duplicated an earlier id.
    pub skipped: usize,
    /// Oldest records dropped to fit the capacity.
    pub truncated: usize,
    /// Pins restored.
    pub pinned: usize,
}

/// Result of reading a session payload.
pub(crate) struct ParsedSession {
    pub records: Vec<Record>,
    pub pinned: Vec<RecordId>,
    pub skipped: usize,
}

/// Accepts a full session object or a bare array of records. Returns `None`
/// when there is no usable `records` list at all.
pub(crate) fn parse_session(payload: &Value) -> Option<ParsedSession> {
    let (entries, pinned) = match payload {
        Value::Array(entries) => (entries, Vec::new()),
        Value::Object(obj) => {
            let entries = obj.get("records")?.as_array()?;
            let pinned = obj
                .get("pinnedRecordIds")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_u64).map(RecordId).collect())
                .unwrap_or_default();
            (entries, pinned)
        }
        _ => return None,
    };

    let mut records = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for (index, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<Record>(entry.clone()) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed record in import");
                skipped += 1;
            }
        }
    }

    Some(ParsedSession {
        records,
        pinned,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_array_accepted() {
        let parsed = parse_session(&json!([
            {"id": 1, "origin": "a", "timestamp": "2024-01-01T00:00:00Z"}
        ]))
        .unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert!(parsed.pinned.is_empty());
    }

    #[test]
    fn test_missing_records_rejected() {
        assert!(parse_session(&json!({"version": 1})).is_none());
        assert!(parse_session(&json!({"records": "nope"})).is_none());
        assert!(parse_session(&json!(17)).is_none());
    }

    #[test]
    fn test_bad_entries_counted() {
        let parsed = parse_session(&json!({
            "records": [
                {"id": 1, "origin": "a", "timestamp": "2024-01-01T00:00:00Z", "kind": "warp"},
                {"id": "x"},
                7
            ],
            "pinnedRecordIds": [1, "two"]
        }))
        .unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.pinned, vec![RecordId(1)]);
        assert_eq!(parsed.records[0].kind, crate::types::RecordKind::Update);
    }

    #[test]
    fn test_strict_parse() {
        let text = r#"{
            "version": 1,
            "generatedAt": "2024-01-01T00:00:00Z",
            "records": [{"id": 3, "origin": "a", "timestamp": "2024-01-01T00:00:00Z"}],
            "maxRecords": 10
        }"#;
        let session = Session::from_json_str(text).unwrap();
        assert_eq!(session.records[0].id, RecordId(3));
        assert!(session.pinned_record_ids.is_empty());
        assert_eq!(Session::from_json_str(&session.to_json_pretty().unwrap()).unwrap(), session);

        let broken = text.replace("\"id\": 3", "\"id\": \"three\"");
        assert!(matches!(
            Session::from_json_str(&broken),
            Err(TimelineError::Deserialization(_))
        ));
    }
}
