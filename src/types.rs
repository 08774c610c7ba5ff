//! Core types for the timeline.

use crate::diff::DiffEntry;
use crate::snapshot::{Snapshot, StateValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique identifier for a record, assigned at capture time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// The id after this one, or `None` once the id space is exhausted.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(RecordId)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of state change a record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    #[default]
    Update,
    Transition,
    Add,
    Dispose,
    Error,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Update,
        RecordKind::Transition,
        RecordKind::Add,
        RecordKind::Dispose,
        RecordKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Update => "update",
            RecordKind::Transition => "transition",
            RecordKind::Add => "add",
            RecordKind::Dispose => "dispose",
            RecordKind::Error => "error",
        }
    }

    /// Parse a kind name. Unknown names fall back to `Update`.
    pub fn parse_lenient(name: &str) -> Self {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(RecordKind::Update)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(value
            .as_str()
            .map(RecordKind::parse_lenient)
            .unwrap_or_default())
    }
}

/// Severity of an annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("warning") => Severity::Warning,
            Some("critical") => Severity::Critical,
            _ => Severity::Info,
        })
    }
}

/// A note attached to a record after capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
            severity: Severity::Info,
            tags: BTreeSet::new(),
            author: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }
}

/// External evidence linked to a record (screenshot, log file, URL).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub uri: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            uri: uri.into(),
            content_type: None,
            description: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One timeline entry.
///
/// Records are never edited in place once stored. Mutations build a new value
/// through the `with_*` methods and the timeline swaps it in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,

    pub origin: String,

    #[serde(default)]
    pub kind: RecordKind,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_type: Option<String>,

    /// Free-form source details.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_snapshot: Option<Snapshot>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<DiffEntry>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Record {
    /// A bare record with no snapshots or decorations.
    pub fn new(
        id: RecordId,
        origin: impl Into<String>,
        kind: RecordKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id,
            origin: origin.into(),
            kind,
            timestamp: Utc::now(),
            summary: summary.into(),
            previous_summary: None,
            runtime_type: None,
            details: serde_json::Map::new(),
            snapshot: None,
            previous_snapshot: None,
            diffs: Vec::new(),
            tags: BTreeSet::new(),
            metrics: BTreeMap::new(),
            annotations: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    // --- Copy-on-write mutations ---

    pub fn with_annotation(&self, annotation: Annotation) -> Self {
        let mut next = self.clone();
        next.annotations.push(annotation);
        next
    }

    /// `None` when no annotation has that id.
    pub fn without_annotation(&self, annotation_id: &str) -> Option<Self> {
        let index = self.annotations.iter().position(|a| a.id == annotation_id)?;
        let mut next = self.clone();
        next.annotations.remove(index);
        Some(next)
    }

    pub fn with_merged_tags<I, S>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        next.tags.extend(normalize_tags(tags));
        next
    }

    pub fn with_tags<I, S>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        next.tags = normalize_tags(tags);
        next
    }

    pub fn with_attachment(&self, attachment: Attachment) -> Self {
        let mut next = self.clone();
        next.attachments.push(attachment);
        next
    }

    /// `None` when no attachment has that id.
    pub fn without_attachment(&self, attachment_id: &str) -> Option<Self> {
        let index = self.attachments.iter().position(|a| a.id == attachment_id)?;
        let mut next = self.clone();
        next.attachments.remove(index);
        Some(next)
    }

    /// Merge metrics, overwriting existing keys. Non-finite values are dropped.
    pub fn with_merged_metrics<I, K>(&self, metrics: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut next = self.clone();
        next.metrics.extend(normalize_metrics(metrics));
        next
    }
}

/// Trim tags and drop empty ones.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn normalize_metrics<I, K>(metrics: I) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<String>,
{
    metrics
        .into_iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| (k.into(), v))
        .collect()
}

/// Input for a capture (before id and diffs are assigned).
#[derive(Clone, Debug)]
pub struct CaptureInput {
    pub origin: String,
    pub kind: RecordKind,
    pub summary: String,
    pub previous_summary: Option<String>,
    pub state: Option<StateValue>,
    pub previous_state: Option<StateValue>,
    pub snapshot: Option<Snapshot>,
    pub previous_snapshot: Option<Snapshot>,
    pub runtime_type: Option<String>,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub tags: BTreeSet<String>,
    pub metrics: BTreeMap<String, f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CaptureInput {
    pub fn new(origin: impl Into<String>, kind: RecordKind, summary: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            kind,
            summary: summary.into(),
            previous_summary: None,
            state: None,
            previous_state: None,
            snapshot: None,
            previous_snapshot: None,
            runtime_type: None,
            details: serde_json::Map::new(),
            tags: BTreeSet::new(),
            metrics: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Shorthand for an `Update` capture.
    pub fn update(origin: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(origin, RecordKind::Update, summary)
    }

    pub fn with_state(mut self, state: impl Into<StateValue>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_previous_state(mut self, state: impl Into<StateValue>) -> Self {
        self.previous_state = Some(state.into());
        self
    }

    /// Use a prebuilt snapshot instead of building one from `state`.
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_previous_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.previous_snapshot = Some(snapshot);
        self
    }

    pub fn with_previous_summary(mut self, summary: impl Into<String>) -> Self {
        self.previous_summary = Some(summary.into());
        self
    }

    pub fn with_runtime_type(mut self, runtime_type: impl Into<String>) -> Self {
        self.runtime_type = Some(runtime_type.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_metrics<I, K>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.metrics = normalize_metrics(metrics);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
