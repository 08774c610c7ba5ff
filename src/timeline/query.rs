//! Record filtering for timeline queries.

use crate::types::{Record, RecordKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Criteria for [`Timeline::query`](super::Timeline::query). Empty criteria
/// match everything.
#[derive(Clone, Debug, Default)]
pub struct RecordFilter {
    /// Match any of these origins.
    pub origins: BTreeSet<String>,
    /// Match any of these kinds.
    pub kinds: BTreeSet<RecordKind>,
    /// Records must carry every one of these tags.
    pub tags: BTreeSet<String>,
    /// Case-insensitive substring over origin, summary, tags and annotation
    /// messages.
    pub text: Option<String>,
    pub pinned_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.insert(origin.into());
        self
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn tag(mut self, tag: impl AsRef<str>) -> Self {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() {
            self.tags.insert(tag.to_string());
        }
        self
    }

    pub fn text(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.text = (!needle.trim().is_empty()).then(|| needle.trim().to_lowercase());
        self
    }

    pub fn pinned_only(mut self) -> Self {
        self.pinned_only = true;
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, record: &Record, pinned: bool) -> bool {
        if self.pinned_only && !pinned {
            return false;
        }
        if !self.origins.is_empty() && !self.origins.contains(&record.origin) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        if !self.tags.iter().all(|t| record.tags.contains(t)) {
            return false;
        }
        if self.since.is_some_and(|since| record.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.timestamp > until) {
            return false;
        }
        match &self.text {
            Some(needle) => text_matches(record, needle),
            None => true,
        }
    }
}

fn text_matches(record: &Record, needle: &str) -> bool {
    let hit = |haystack: &str| haystack.to_lowercase().contains(needle);
    hit(&record.origin)
        || hit(&record.summary)
        || record.tags.iter().any(|t| hit(t))
        || record.annotations.iter().any(|a| hit(&a.message))
}
