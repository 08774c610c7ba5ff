//! The timeline: the single mutation authority over captured records.

use super::query::RecordFilter;
use super::session::{parse_session, ImportSummary, Session, SESSION_VERSION};
use crate::analytics::{self, AnalyticsSnapshot};
use crate::config::TimelineConfig;
use crate::diff::diff_snapshots;
use crate::error::{Result, TimelineError};
use crate::sinks::{FnSink, SinkId, SinkRegistry, TimelineEvent, TimelineSink, WireMessage};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::types::{Annotation, Attachment, CaptureInput, Record, RecordId};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mutable state guarded by the timeline.
#[derive(Default)]
struct TimelineState {
    /// Records in insertion (and id) order.
    records: VecDeque<Arc<Record>>,
    pinned: BTreeSet<RecordId>,
    /// Last id handed out.
    sequence: u64,
    paused: bool,
}

impl TimelineState {
    fn index_of(&self, id: RecordId) -> Option<usize> {
        self.records.binary_search_by_key(&id, |r| r.id).ok()
    }
}

/// A bounded, ordered timeline of captured state changes.
///
/// All mutating methods take the write lock for their whole duration,
/// including sink notification, so concurrent callers are serialized and
/// sinks observe mutations in the order they were applied. Readers never see
/// a partially applied mutation.
pub struct Timeline {
    config: TimelineConfig,
    builder: SnapshotBuilder,
    state: RwLock<TimelineState>,
    analytics: RwLock<Arc<AnalyticsSnapshot>>,
    sinks: SinkRegistry,
    write_lock: Mutex<()>,
}

impl Timeline {
    pub fn new(config: TimelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            builder: SnapshotBuilder::from_config(&config),
            config,
            state: RwLock::new(TimelineState::default()),
            analytics: RwLock::new(Arc::new(AnalyticsSnapshot::default())),
            sinks: SinkRegistry::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Timeline with the given capacity and default limits.
    pub fn with_capacity(max_records: usize) -> Result<Self> {
        Self::new(TimelineConfig::with_max_records(max_records))
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// The builder used for captures, for callers preparing snapshots.
    pub fn snapshot_builder(&self) -> &SnapshotBuilder {
        &self.builder
    }

    // --- Sinks ---

    pub fn add_sink(&self, sink: Arc<dyn TimelineSink>) -> SinkId {
        self.sinks.add(sink)
    }

    /// Register a closure that sees every event.
    pub fn add_listener<F>(&self, listener: F) -> SinkId
    where
        F: Fn(&TimelineEvent) + Send + Sync + 'static,
    {
        self.sinks.add(Arc::new(FnSink(listener)))
    }

    /// Detach a sink. Takes effect for every mutation that starts after this
    /// returns.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        self.sinks.remove(id)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    // --- Capture ---

    /// Capture a state change. Returns `None` while paused.
    pub fn capture(&self, input: CaptureInput) -> Option<Arc<Record>> {
        let _lock = self.write_lock.lock();

        if self.state.read().paused {
            debug!(origin = %input.origin, "Timeline paused, dropping capture");
            return None;
        }

        let snapshot = input
            .snapshot
            .or_else(|| input.state.as_ref().map(|s| self.builder.build(s)));

        let previous_snapshot = input
            .previous_snapshot
            .or_else(|| input.previous_state.as_ref().map(|s| self.builder.build(s)))
            .or_else(|| self.latest_snapshot_for(&input.origin));

        let diffs = snapshot
            .as_ref()
            .map(|current| {
                diff_snapshots(previous_snapshot.as_ref(), current, self.config.max_diff_entries)
            })
            .unwrap_or_default();

        let runtime_type = input
            .runtime_type
            .or_else(|| input.state.as_ref().map(|s| s.runtime_type()));

        let mut state = self.state.write();
        let Some(id) = RecordId(state.sequence).next() else {
            warn!(origin = %input.origin, "Record ids exhausted, dropping capture");
            return None;
        };
        state.sequence = id.0;
        let record = Record {
            id,
            origin: input.origin,
            kind: input.kind,
            timestamp: input.timestamp.unwrap_or_else(Utc::now),
            summary: input.summary,
            previous_summary: input.previous_summary,
            runtime_type,
            details: input.details,
            snapshot,
            previous_snapshot,
            diffs,
            tags: input.tags,
            metrics: input.metrics,
            annotations: Vec::new(),
            attachments: Vec::new(),
        };
        debug!(
            id = %record.id,
            origin = %record.origin,
            kind = %record.kind,
            diffs = record.diffs.len(),
            "Captured record"
        );

        let record = self.insert_locked(&mut state, record);
        drop(state);

        self.sinks
            .dispatch(&TimelineEvent::RecordAdded(Arc::clone(&record)));
        Some(record)
    }

    /// Append an already built record, keeping its id.
    ///
    /// Returns `None` while paused, or when the id is not greater than every
    /// id this timeline has handed out.
    pub fn append(&self, record: Record) -> Option<Arc<Record>> {
        let _lock = self.write_lock.lock();

        let mut state = self.state.write();
        if state.paused {
            return None;
        }
        if record.id.0 <= state.sequence {
            warn!(id = %record.id, sequence = state.sequence, "Rejecting append with stale id");
            return None;
        }
        state.sequence = record.id.0;

        let record = self.insert_locked(&mut state, record);
        drop(state);

        self.sinks
            .dispatch(&TimelineEvent::RecordAdded(Arc::clone(&record)));
        Some(record)
    }

    /// Push a record, evicting from the front past capacity. Pins do not
    /// protect a record from eviction.
    fn insert_locked(&self, state: &mut TimelineState, record: Record) -> Arc<Record> {
        let record = Arc::new(record);
        state.records.push_back(Arc::clone(&record));

        while state.records.len() > self.config.max_records {
            if let Some(evicted) = state.records.pop_front() {
                let was_pinned = state.pinned.remove(&evicted.id);
                debug!(id = %evicted.id, was_pinned, "Evicted oldest record");
            }
        }

        self.refresh_analytics(state);
        record
    }

    fn latest_snapshot_for(&self, origin: &str) -> Option<Snapshot> {
        self.state
            .read()
            .records
            .iter()
            .rev()
            .find(|r| r.origin == origin)
            .and_then(|r| r.snapshot.clone())
    }

    fn refresh_analytics(&self, state: &TimelineState) {
        let snapshot = analytics::compute(state.records.iter().map(|r| r.as_ref()));
        *self.analytics.write() = Arc::new(snapshot);
    }

    // --- Clear / pause ---

    /// Remove every record and pin. Returns false if already empty.
    pub fn clear(&self) -> bool {
        let _lock = self.write_lock.lock();
        {
            let mut state = self.state.write();
            if state.records.is_empty() {
                return false;
            }
            state.records.clear();
            state.pinned.clear();
            self.refresh_analytics(&state);
        }
        debug!("Timeline cleared");
        self.sinks.dispatch(&TimelineEvent::RecordsCleared);
        true
    }

    pub fn pause(&self) -> bool {
        let _lock = self.write_lock.lock();
        self.set_paused_locked(true)
    }

    pub fn resume(&self) -> bool {
        let _lock = self.write_lock.lock();
        self.set_paused_locked(false)
    }

    /// Flip the pause flag, or set it to `explicit` when given. Returns the
    /// resulting state.
    pub fn toggle_pause(&self, explicit: Option<bool>) -> bool {
        let _lock = self.write_lock.lock();
        let target = explicit.unwrap_or_else(|| !self.state.read().paused);
        self.set_paused_locked(target);
        target
    }

    /// Returns true if the flag changed. Caller holds the write lock.
    fn set_paused_locked(&self, paused: bool) -> bool {
        {
            let mut state = self.state.write();
            if state.paused == paused {
                return false;
            }
            state.paused = paused;
        }
        info!(paused, "Timeline pause changed");
        self.sinks.dispatch(&TimelineEvent::PauseChanged(paused));
        true
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    // --- Pins ---

    /// Pin a record. `Ok(false)` if it was already pinned.
    pub fn pin(&self, id: RecordId) -> Result<bool> {
        self.set_pinned(id, Some(true)).map(|(changed, _)| changed)
    }

    /// Unpin a record. Returns false if it was not pinned.
    pub fn unpin(&self, id: RecordId) -> bool {
        let _lock = self.write_lock.lock();
        if !self.state.write().pinned.remove(&id) {
            return false;
        }
        self.sinks
            .dispatch(&TimelineEvent::PinChanged { id, pinned: false });
        true
    }

    /// Flip a record's pin. Returns the new pin state.
    pub fn toggle_pin(&self, id: RecordId) -> Result<bool> {
        self.set_pinned(id, None).map(|(_, pinned)| pinned)
    }

    /// `target = None` flips. Returns (changed, pinned).
    fn set_pinned(&self, id: RecordId, target: Option<bool>) -> Result<(bool, bool)> {
        let _lock = self.write_lock.lock();
        let pinned = {
            let mut state = self.state.write();
            if state.index_of(id).is_none() {
                return Err(TimelineError::RecordNotFound(id));
            }
            let pinned = target.unwrap_or(!state.pinned.contains(&id));
            let changed = if pinned {
                state.pinned.insert(id)
            } else {
                state.pinned.remove(&id)
            };
            if !changed {
                return Ok((false, pinned));
            }
            pinned
        };
        self.sinks
            .dispatch(&TimelineEvent::PinChanged { id, pinned });
        Ok((true, pinned))
    }

    pub fn is_pinned(&self, id: RecordId) -> bool {
        self.state.read().pinned.contains(&id)
    }

    pub fn pinned_ids(&self) -> Vec<RecordId> {
        self.state.read().pinned.iter().copied().collect()
    }

    // --- Copy-on-write mutations ---

    /// Replace record `id` with `f(&current)` at the same position.
    fn mutate<F>(&self, id: RecordId, f: F) -> Result<Arc<Record>>
    where
        F: FnOnce(&Record) -> Result<Record>,
    {
        let _lock = self.write_lock.lock();
        let updated = {
            let mut state = self.state.write();
            let index = state
                .index_of(id)
                .ok_or(TimelineError::RecordNotFound(id))?;
            let mut next = f(&state.records[index])?;
            next.id = id;
            let next = Arc::new(next);
            state.records[index] = Arc::clone(&next);
            self.refresh_analytics(&state);
            next
        };
        self.sinks
            .dispatch(&TimelineEvent::RecordMutated(Arc::clone(&updated)));
        Ok(updated)
    }

    pub fn add_annotation(&self, id: RecordId, annotation: Annotation) -> Result<Arc<Record>> {
        self.mutate(id, |r| Ok(r.with_annotation(annotation)))
    }

    pub fn remove_annotation(&self, id: RecordId, annotation_id: &str) -> Result<Arc<Record>> {
        self.mutate(id, |r| {
            r.without_annotation(annotation_id)
                .ok_or_else(|| TimelineError::AnnotationNotFound {
                    record: id,
                    annotation: annotation_id.to_string(),
                })
        })
    }

    /// Add tags to the existing set.
    pub fn merge_tags<I, S>(&self, id: RecordId, tags: I) -> Result<Arc<Record>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutate(id, |r| Ok(r.with_merged_tags(tags)))
    }

    /// Replace the tag set.
    pub fn replace_tags<I, S>(&self, id: RecordId, tags: I) -> Result<Arc<Record>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutate(id, |r| Ok(r.with_tags(tags)))
    }

    pub fn add_attachment(&self, id: RecordId, attachment: Attachment) -> Result<Arc<Record>> {
        self.mutate(id, |r| Ok(r.with_attachment(attachment)))
    }

    pub fn remove_attachment(&self, id: RecordId, attachment_id: &str) -> Result<Arc<Record>> {
        self.mutate(id, |r| {
            r.without_attachment(attachment_id)
                .ok_or_else(|| TimelineError::AttachmentNotFound {
                    record: id,
                    attachment: attachment_id.to_string(),
                })
        })
    }

    /// Merge metrics into the record, overwriting existing keys.
    pub fn merge_metrics<I, K>(&self, id: RecordId, metrics: I) -> Result<Arc<Record>>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.mutate(id, |r| Ok(r.with_merged_metrics(metrics)))
    }

    /// Swap in a whole record with the same id (used by mirrors).
    pub fn replace_record(&self, record: Record) -> Result<Arc<Record>> {
        self.mutate(record.id, |_| Ok(record))
    }

    // --- Reads ---

    pub fn get(&self, id: RecordId) -> Option<Arc<Record>> {
        let state = self.state.read();
        state.index_of(id).map(|i| Arc::clone(&state.records[i]))
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<Arc<Record>> {
        self.state.read().records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<Record>> {
        self.state.read().records.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Last id handed out (0 before the first capture).
    pub fn last_id(&self) -> RecordId {
        RecordId(self.state.read().sequence)
    }

    /// Matching records, oldest first.
    pub fn query(&self, filter: &RecordFilter) -> Vec<Arc<Record>> {
        let state = self.state.read();
        let mut matches: Vec<Arc<Record>> = state
            .records
            .iter()
            .filter(|r| filter.matches(r, state.pinned.contains(&r.id)))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let excess = matches.len().saturating_sub(limit);
            matches.drain(..excess);
        }
        matches
    }

    /// Statistics as of the last mutation.
    pub fn analytics(&self) -> Arc<AnalyticsSnapshot> {
        Arc::clone(&self.analytics.read())
    }

    // --- Sessions ---

    pub fn export_session(&self, label: Option<&str>) -> Session {
        let state = self.state.read();
        Session {
            version: SESSION_VERSION,
            label: label.map(str::to_string),
            generated_at: Utc::now(),
            records: state.records.iter().map(|r| (**r).clone()).collect(),
            pinned_record_ids: state.pinned.iter().copied().collect(),
            max_records: self.config.max_records,
        }
    }

    /// Replace the timeline contents with a session payload.
    ///
    /// Accepts a session object or a bare array of records. Returns `None`
    /// and leaves the timeline untouched when the payload has no records
    /// list; malformed entries inside the list are skipped.
    pub fn import_session(&self, payload: &Value) -> Option<ImportSummary> {
        let parsed = match parse_session(payload) {
            Some(parsed) => parsed,
            None => {
                warn!("Ignoring import payload without a records list");
                return None;
            }
        };
        Some(self.import_records(parsed.records, parsed.pinned, parsed.skipped))
    }

    /// [`import_session`](Self::import_session) from JSON text. Unparseable
    /// text is ignored.
    pub fn import_json(&self, text: &str) -> Option<ImportSummary> {
        match serde_json::from_str::<Value>(text) {
            Ok(payload) => self.import_session(&payload),
            Err(e) => {
                warn!(error = %e, "Ignoring import payload that is not JSON");
                None
            }
        }
    }

    fn import_records(
        &self,
        mut records: Vec<Record>,
        pinned: Vec<RecordId>,
        skipped: usize,
    ) -> ImportSummary {
        let _lock = self.write_lock.lock();

        let before_filter = records.len();
        records.retain(|r| r.id.next().is_some());
        let exhausted = before_filter - records.len();
        if exhausted > 0 {
            warn!(count = exhausted, "Skipping imported records with the maximum id");
        }

        records.sort_by_key(|r| r.id);
        let before_dedup = records.len();
        records.dedup_by_key(|r| r.id);
        let duplicates = before_dedup - records.len();

        let truncated = records.len().saturating_sub(self.config.max_records);
        records.drain(..truncated);

        let imported: Vec<Arc<Record>> = records.into_iter().map(Arc::new).collect();
        let summary = {
            let mut state = self.state.write();
            state.records = imported.iter().cloned().collect();
            let restored: BTreeSet<RecordId> = pinned
                .into_iter()
                .filter(|id| state.index_of(*id).is_some())
                .collect();
            state.pinned = restored;
            state.sequence = imported.last().map_or(0, |r| r.id.0);
            self.refresh_analytics(&state);

            ImportSummary {
                imported: state.records.len(),
                skipped: skipped + exhausted + duplicates,
                truncated,
                pinned: state.pinned.len(),
            }
        };

        info!(
            imported = summary.imported,
            skipped = summary.skipped,
            truncated = summary.truncated,
            "Imported session"
        );
        self.sinks.dispatch(&TimelineEvent::BulkImported(imported));
        summary
    }

    /// Write the exported session as pretty JSON.
    pub fn save_session(&self, path: impl AsRef<Path>, label: Option<&str>) -> Result<()> {
        let session = self.export_session(label);
        let text = session.to_json_pretty()?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Import a session file. I/O failures are errors; contents that are not
    /// a usable session are ignored (`Ok(None)`).
    pub fn load_session(&self, path: impl AsRef<Path>) -> Result<Option<ImportSummary>> {
        let text = fs::read_to_string(path)?;
        Ok(self.import_json(&text))
    }

    // --- Mirroring ---

    /// Apply an envelope received from another timeline. Returns false when
    /// the message changed nothing.
    pub fn apply_wire_message(&self, message: WireMessage) -> bool {
        match message {
            WireMessage::Record(record) => self.append(record).is_some(),
            WireMessage::RecordUpdate(record) => match self.replace_record(record) {
                Ok(_) => true,
                Err(e) => {
                    debug!(error = %e, "Mirror update for unknown record");
                    false
                }
            },
            WireMessage::Clear => self.clear(),
            WireMessage::BulkImport(records) => {
                self.import_records(records, Vec::new(), 0);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordKind;
    use serde_json::json;

    fn timeline(max: usize) -> Timeline {
        Timeline::with_capacity(max).unwrap()
    }

    fn capture(t: &Timeline, origin: &str, summary: &str) -> Arc<Record> {
        t.capture(CaptureInput::update(origin, summary)).unwrap()
    }

    #[test]
    fn test_ids_increase() {
        let t = timeline(10);
        let a = capture(&t, "x", "a");
        let b = capture(&t, "x", "b");
        assert_eq!(a.id, RecordId(1));
        assert_eq!(b.id, RecordId(2));
        assert_eq!(t.last_id(), RecordId(2));
    }

    #[test]
    fn test_eviction_ignores_pins() {
        let t = timeline(2);
        let first = capture(&t, "x", "first");
        t.pin(first.id).unwrap();
        capture(&t, "x", "second");
        capture(&t, "x", "third");

        let summaries: Vec<String> = t.records().iter().map(|r| r.summary.clone()).collect();
        assert_eq!(summaries, vec!["second", "third"]);
        assert!(!t.is_pinned(first.id));
        assert!(t.pinned_ids().is_empty());
    }

    #[test]
    fn test_diff_against_previous_capture_of_same_origin() {
        let t = timeline(10);
        t.capture(CaptureInput::update("counter", "init").with_state(json!({"value": 1})));
        t.capture(CaptureInput::update("other", "noise").with_state(json!({"value": 99})));
        let second = t
            .capture(CaptureInput::update("counter", "inc").with_state(json!({"value": 2})))
            .unwrap();

        assert_eq!(second.diffs.len(), 1);
        assert_eq!(second.diffs[0].before, Some(json!(1)));
        assert_eq!(second.diffs[0].after, Some(json!(2)));
        assert_eq!(second.runtime_type.as_deref(), Some("Map"));
    }

    #[test]
    fn test_diffs_capped() {
        let mut config = TimelineConfig::with_max_records(10);
        config.max_diff_entries = 1;
        let t = Timeline::new(config).unwrap();
        let record = t
            .capture(
                CaptureInput::update("x", "s")
                    .with_previous_state(json!({"a": 1, "b": 1}))
                    .with_state(json!({"a": 2, "b": 2})),
            )
            .unwrap();
        assert_eq!(record.diffs.len(), 1);
    }

    #[test]
    fn test_append_rejects_stale_id() {
        let t = timeline(10);
        capture(&t, "x", "a");
        let stale = Record::new(RecordId(1), "x", RecordKind::Update, "dup");
        assert!(t.append(stale).is_none());
        let fresh = Record::new(RecordId(9), "x", RecordKind::Update, "ok");
        assert_eq!(t.append(fresh).unwrap().id, RecordId(9));
        assert_eq!(capture(&t, "x", "next").id, RecordId(10));
    }

    #[test]
    fn test_capture_stops_when_ids_run_out() {
        let t = timeline(10);
        let last = Record::new(RecordId(u64::MAX - 1), "x", RecordKind::Update, "late");
        assert!(t.append(last).is_some());
        assert_eq!(capture(&t, "x", "final").id, RecordId(u64::MAX));
        assert!(t.capture(CaptureInput::update("x", "overflow")).is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_mutation_replaces_in_place() {
        let t = timeline(10);
        let a = capture(&t, "x", "a");
        capture(&t, "x", "b");

        let updated = t.merge_tags(a.id, [" slow ", ""]).unwrap();
        assert!(updated.has_tag("slow"));
        assert!(a.tags.is_empty());
        assert_eq!(t.records()[0].tags.len(), 1);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_mutation_not_found() {
        let t = timeline(10);
        let result = t.merge_metrics(RecordId(42), [("ms", 1.0)]);
        assert!(matches!(result, Err(TimelineError::RecordNotFound(RecordId(42)))));
    }

    #[test]
    fn test_pause_toggle_is_idempotent() {
        let t = timeline(10);
        assert!(t.pause());
        assert!(!t.pause());
        assert!(!t.toggle_pause(None));
        assert!(t.toggle_pause(Some(true)));
        assert!(t.capture(CaptureInput::update("x", "dropped")).is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn test_analytics_refreshed() {
        let t = timeline(10);
        capture(&t, "x", "a");
        capture(&t, "y", "b");
        assert_eq!(t.analytics().total_records, 2);
        t.clear();
        assert_eq!(t.analytics().total_records, 0);
    }

    #[test]
    fn test_query_limit_keeps_newest() {
        let t = timeline(10);
        for i in 0..5 {
            capture(&t, "x", &format!("s{}", i));
        }
        let hits = t.query(&RecordFilter::new().origin("x").limit(2));
        let summaries: Vec<&str> = hits.iter().map(|r| r.summary.as_str()).collect();
        assert_eq!(summaries, vec!["s3", "s4"]);
    }
}
