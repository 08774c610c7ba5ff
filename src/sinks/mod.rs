//! Broadcast of timeline mutations to registered sinks.
//!
//! Every mutation the timeline performs is published as a [`TimelineEvent`]
//! to each registered [`TimelineSink`], synchronously and in registration
//! order, before the mutating call returns. UI-style listeners and transport
//! sinks use the same registry and differ only in which hooks they implement.
//!
//! Provided sinks:
//! - [`StreamSink`]: in-process fan-out over bounded channels
//! - [`RemoteSocketSink`]: newline-delimited JSON over one TCP connection
//! - [`EventBus`]: re-publishes mutations plus periodic analytics on a
//!   tokio broadcast channel

mod bus;
mod message;
mod remote;
mod stream;

pub use bus::{BusEvent, BusPayload, EventBus};
pub use message::WireMessage;
pub use remote::{RemoteSocketSink, SinkStatus};
pub use stream::{
    DropReason, StreamEvent, StreamFilter, StreamSink, StreamSubscription, SubscriptionId,
};

use crate::types::{Record, RecordId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A mutation performed by the timeline.
#[derive(Clone, Debug)]
pub enum TimelineEvent {
    RecordAdded(Arc<Record>),
    RecordMutated(Arc<Record>),
    RecordsCleared,
    BulkImported(Vec<Arc<Record>>),
    PauseChanged(bool),
    PinChanged { id: RecordId, pinned: bool },
}

/// A consumer of timeline mutations.
///
/// Every hook defaults to a no-op, so a sink implements only the
/// capabilities it cares about. Hooks run while the timeline holds its write
/// lock: they may read from the timeline but must not mutate it. Errors are
/// the sink's own business; nothing propagates back to the timeline.
pub trait TimelineSink: Send + Sync {
    fn on_record_added(&self, _record: &Record) {}

    fn on_record_mutated(&self, _record: &Record) {}

    fn on_records_cleared(&self) {}

    fn on_bulk_import(&self, _records: &[Arc<Record>]) {}

    fn on_pause_changed(&self, _paused: bool) {}

    fn on_pin_changed(&self, _id: RecordId, _pinned: bool) {}

    /// Route an event to the matching hook.
    fn handle(&self, event: &TimelineEvent) {
        match event {
            TimelineEvent::RecordAdded(record) => self.on_record_added(record),
            TimelineEvent::RecordMutated(record) => self.on_record_mutated(record),
            TimelineEvent::RecordsCleared => self.on_records_cleared(),
            TimelineEvent::BulkImported(records) => self.on_bulk_import(records),
            TimelineEvent::PauseChanged(paused) => self.on_pause_changed(*paused),
            TimelineEvent::PinChanged { id, pinned } => self.on_pin_changed(*id, *pinned),
        }
    }
}

/// Adapts a closure into a sink that sees every event.
pub struct FnSink<F>(pub F);

impl<F> TimelineSink for FnSink<F>
where
    F: Fn(&TimelineEvent) + Send + Sync,
{
    fn handle(&self, event: &TimelineEvent) {
        (self.0)(event)
    }
}

/// Handle returned when a sink is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SinkId(pub u64);

/// Ordered registry of attached sinks.
pub struct SinkRegistry {
    sinks: RwLock<Vec<(SinkId, Arc<dyn TimelineSink>)>>,
    next_id: AtomicU64,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, sink: Arc<dyn TimelineSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sinks.write().push((id, sink));
        id
    }

    /// Detach a sink. Returns false if it was not registered.
    pub fn remove(&self, id: SinkId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    /// Deliver an event to every sink in registration order.
    pub fn dispatch(&self, event: &TimelineEvent) {
        // Snapshot the list so hooks can detach sinks without deadlocking.
        let sinks: Vec<Arc<dyn TimelineSink>> =
            self.sinks.read().iter().map(|(_, s)| Arc::clone(s)).collect();
        for sink in sinks {
            sink.handle(event);
        }
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}
