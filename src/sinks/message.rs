//! Wire envelope shared by the in-process and remote sinks.

use super::TimelineEvent;
use crate::error::Result;
use crate::types::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// One JSON object per timeline mutation: `{"type": ..., "payload": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WireMessage {
    #[serde(rename = "record")]
    Record(Record),

    #[serde(rename = "record:update")]
    RecordUpdate(Record),

    #[serde(rename = "clear")]
    Clear,

    #[serde(rename = "bulkImport")]
    BulkImport(Vec<Record>),
}

impl WireMessage {
    /// The envelope for a timeline event. Pause and pin changes are local
    /// view state and have no wire form.
    pub fn from_event(event: &TimelineEvent) -> Option<Self> {
        match event {
            TimelineEvent::RecordAdded(record) => Some(WireMessage::Record((**record).clone())),
            TimelineEvent::RecordMutated(record) => {
                Some(WireMessage::RecordUpdate((**record).clone()))
            }
            TimelineEvent::RecordsCleared => Some(WireMessage::Clear),
            TimelineEvent::BulkImported(records) => Some(WireMessage::BulkImport(
                records.iter().map(|r| (**r).clone()).collect(),
            )),
            TimelineEvent::PauseChanged(_) | TimelineEvent::PinChanged { .. } => None,
        }
    }

    /// The `type` tag of this message.
    pub fn message_type(&self) -> &'static str {
        match self {
            WireMessage::Record(_) => "record",
            WireMessage::RecordUpdate(_) => "record:update",
            WireMessage::Clear => "clear",
            WireMessage::BulkImport(_) => "bulkImport",
        }
    }

    /// Encode as a single-line JSON frame (no trailing newline).
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame. Malformed frames and unknown types yield `None`;
    /// malformed records inside a bulk import are skipped individually.
    pub fn parse_lenient(frame: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(frame.trim()).ok()?;
        let kind = value.get("type")?.as_str()?;
        let payload = value.get("payload");

        match kind {
            "record" => parse_record(payload?).map(WireMessage::Record),
            "record:update" => parse_record(payload?).map(WireMessage::RecordUpdate),
            "clear" => Some(WireMessage::Clear),
            "bulkImport" => {
                let items = payload?.as_array()?;
                Some(WireMessage::BulkImport(
                    items.iter().filter_map(parse_record).collect(),
                ))
            }
            other => {
                warn!(message_type = other, "Ignoring unknown wire message type");
                None
            }
        }
    }
}

fn parse_record(value: &Value) -> Option<Record> {
    match serde_json::from_value(value.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "Skipping malformed record in wire message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordId, RecordKind};
    use serde_json::json;

    #[test]
    fn test_clear_is_bare() {
        let frame = WireMessage::Clear.to_frame().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&frame).unwrap(), json!({"type": "clear"}));
        assert_eq!(WireMessage::parse_lenient(&frame), Some(WireMessage::Clear));
    }

    #[test]
    fn test_record_envelope() {
        let record = Record::new(RecordId(4), "auth", RecordKind::Transition, "signed in");
        let frame = WireMessage::RecordUpdate(record.clone()).to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "record:update");
        assert_eq!(value["payload"]["origin"], "auth");
        assert_eq!(
            WireMessage::parse_lenient(&frame),
            Some(WireMessage::RecordUpdate(record))
        );
    }

    #[test]
    fn test_bulk_import_skips_bad_entries() {
        let good = Record::new(RecordId(1), "a", RecordKind::Add, "ok");
        let frame = json!({
            "type": "bulkImport",
            "payload": [serde_json::to_value(&good).unwrap(), {"nonsense": true}]
        })
        .to_string();

        match WireMessage::parse_lenient(&frame) {
            Some(WireMessage::BulkImport(records)) => assert_eq!(records, vec![good]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_garbage_frames() {
        assert!(WireMessage::parse_lenient("not json").is_none());
        assert!(WireMessage::parse_lenient(r#"{"type": "teleport"}"#).is_none());
        assert!(WireMessage::parse_lenient(r#"{"type": "record"}"#).is_none());
    }
}
