//! Event bus: re-publishes timeline mutations on a tokio broadcast channel.
//!
//! ```text
//! Timeline mutation
//!      ↓
//! EventBus (TimelineSink) → broadcast::Sender<BusEvent>
//!      ↓
//! Fan-out to any number of async receivers
//! ```
//!
//! Every `analytics_every` mutations the bus also publishes the timeline's
//! current [`AnalyticsSnapshot`], so dashboards can follow the aggregate
//! without recomputing it.

use super::{SinkId, TimelineEvent, TimelineSink};
use crate::analytics::AnalyticsSnapshot;
use crate::config::EventBusConfig;
use crate::timeline::Timeline;
use crate::types::Record;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// What a bus event carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum BusPayload {
    RecordAdded(Record),
    RecordMutated(Record),
    Cleared,
    BulkImported(Vec<Record>),
    Analytics(AnalyticsSnapshot),
}

impl BusPayload {
    fn from_event(event: &TimelineEvent) -> Option<Self> {
        match event {
            TimelineEvent::RecordAdded(r) => Some(BusPayload::RecordAdded((**r).clone())),
            TimelineEvent::RecordMutated(r) => Some(BusPayload::RecordMutated((**r).clone())),
            TimelineEvent::RecordsCleared => Some(BusPayload::Cleared),
            TimelineEvent::BulkImported(records) => Some(BusPayload::BulkImported(
                records.iter().map(|r| (**r).clone()).collect(),
            )),
            TimelineEvent::PauseChanged(_) | TimelineEvent::PinChanged { .. } => None,
        }
    }
}

/// A uniformly typed event on the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub id: String,
    /// Position on this bus, starting at 1.
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: BusPayload,
}

pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    config: EventBusConfig,
    sequence: AtomicU64,
    mutations: AtomicU64,
    timeline: RwLock<Weak<Timeline>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Arc<Self> {
        let (tx, _) = broadcast::channel(config.capacity.max(1));
        Arc::new(Self {
            tx,
            config,
            sequence: AtomicU64::new(0),
            mutations: AtomicU64::new(0),
            timeline: RwLock::new(Weak::new()),
        })
    }

    /// Register on `timeline` and read its analytics for periodic snapshots.
    /// The bus only keeps a weak reference back to the timeline.
    pub fn attach(self: &Arc<Self>, timeline: &Arc<Timeline>) -> SinkId {
        *self.timeline.write() = Arc::downgrade(timeline);
        timeline.add_sink(Arc::clone(self) as Arc<dyn TimelineSink>)
    }

    /// Receive every event published from now on. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a payload. Returns the number of receivers reached (0 when
    /// nobody is listening).
    pub fn publish(&self, payload: BusPayload) -> usize {
        let event = BusEvent {
            id: Uuid::new_v4().to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            emitted_at: Utc::now(),
            payload,
        };
        trace!(sequence = event.sequence, "Publishing bus event");
        self.tx.send(event).unwrap_or(0)
    }

    fn maybe_publish_analytics(&self) {
        let every = self.config.analytics_every;
        if every == 0 {
            return;
        }
        let count = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;
        if count % every != 0 {
            return;
        }
        if let Some(timeline) = self.timeline.read().upgrade() {
            let snapshot = timeline.analytics();
            self.publish(BusPayload::Analytics((*snapshot).clone()));
        }
    }
}

impl TimelineSink for EventBus {
    fn handle(&self, event: &TimelineEvent) {
        let Some(payload) = BusPayload::from_event(event) else {
            return;
        };
        self.publish(payload);
        self.maybe_publish_analytics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CaptureInput;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(EventBusConfig::default());
        assert_eq!(bus.publish(BusPayload::Cleared), 0);
    }

    #[test]
    fn test_mutations_and_periodic_analytics() {
        let bus = EventBus::new(EventBusConfig {
            capacity: 16,
            analytics_every: 2,
        });
        let timeline = Arc::new(Timeline::with_capacity(10).unwrap());
        bus.attach(&timeline);
        let mut rx = bus.subscribe();

        timeline.capture(CaptureInput::update("a", "one"));
        timeline.pause();
        timeline.resume();
        timeline.capture(CaptureInput::update("a", "two"));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.sequence, 1);
        assert!(matches!(first.payload, BusPayload::RecordAdded(ref r) if r.summary == "one"));

        assert!(matches!(rx.try_recv().unwrap().payload, BusPayload::RecordAdded(_)));
        match rx.try_recv().unwrap().payload {
            BusPayload::Analytics(stats) => assert_eq!(stats.total_records, 2),
            other => panic!("expected analytics, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let bus = EventBus::new(EventBusConfig::default());
        let mut rx = bus.subscribe();
        bus.publish(BusPayload::Cleared);
        let value = serde_json::to_value(rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "cleared");
        assert_eq!(value["sequence"], 1);
        assert!(value["emittedAt"].is_string());
    }
}
