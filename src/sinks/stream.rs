//! In-process stream sink: fans wire messages out to same-process consumers.

use super::{TimelineEvent, TimelineSink, WireMessage};
use crate::config::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Unique identifier for a stream subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Items delivered to stream subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Message(WireMessage),
    /// Last item a subscriber receives before being detached.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver was dropped.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Filter criteria for a subscription.
#[derive(Clone, Debug, Default)]
pub struct StreamFilter {
    /// Only deliver record messages from these origins (None = all).
    /// `clear` and `bulkImport` are always delivered.
    pub origins: Option<Vec<String>>,
}

impl StreamFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn origins(origins: Vec<String>) -> Self {
        Self {
            origins: Some(origins),
        }
    }

    fn matches(&self, message: &WireMessage) -> bool {
        let origin = match message {
            WireMessage::Record(r) | WireMessage::RecordUpdate(r) => &r.origin,
            WireMessage::Clear | WireMessage::BulkImport(_) => return true,
        };
        match &self.origins {
            Some(origins) => origins.iter().any(|o| o == origin),
            None => true,
        }
    }
}

struct Subscriber {
    filter: StreamFilter,
    sender: Sender<StreamEvent>,
}

impl Subscriber {
    /// Returns the drop reason if the message could not be delivered.
    fn try_send(&self, event: StreamEvent) -> Option<DropReason> {
        match self.sender.try_send(event) {
            Ok(()) => None,
            Err(crossbeam_channel::TrySendError::Full(_)) => Some(DropReason::BufferOverflow),
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Some(DropReason::Disconnected),
        }
    }
}

/// Receiving side of a stream subscription.
pub struct StreamSubscription {
    pub id: SubscriptionId,
    pub receiver: Receiver<StreamEvent>,
}

impl StreamSubscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StreamEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StreamEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<StreamEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Publishes every timeline mutation as a [`WireMessage`] to in-process
/// subscribers over bounded channels. Subscribers that cannot keep up are
/// dropped rather than blocking the timeline.
pub struct StreamSink {
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    config: StreamConfig,
}

impl StreamSink {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn subscribe(&self, filter: StreamFilter) -> StreamSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.config.buffer_size.max(1));
        self.subscribers
            .write()
            .insert(id, Subscriber { filter, sender });
        StreamSubscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscribers.write().remove(&id) {
            let _ = sub.sender.try_send(StreamEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Push a message to every matching subscriber.
    pub fn publish(&self, message: WireMessage) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscribers.read();
            for (id, sub) in subs.iter() {
                if !sub.filter.matches(&message) {
                    continue;
                }
                if let Some(reason) = sub.try_send(StreamEvent::Message(message.clone())) {
                    to_remove.push((*id, reason));
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscribers.write();
            for (id, reason) in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = id.0, ?reason, "Dropping stream subscriber");
                    // Best effort: a full buffer will reject this too.
                    let _ = sub.sender.try_send(StreamEvent::Dropped { reason });
                }
            }
        }
    }
}

impl Default for StreamSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineSink for StreamSink {
    fn handle(&self, event: &TimelineEvent) {
        if let Some(message) = WireMessage::from_event(event) {
            self.publish(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Record, RecordId, RecordKind};
    use std::sync::Arc;

    fn added(id: u64, origin: &str) -> TimelineEvent {
        TimelineEvent::RecordAdded(Arc::new(Record::new(
            RecordId(id),
            origin,
            RecordKind::Update,
            "s",
        )))
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let sink = StreamSink::new();
        let sub = sink.subscribe(StreamFilter::all());
        assert_eq!(sink.subscriber_count(), 1);

        sink.unsubscribe(sub.id);
        assert_eq!(sink.subscriber_count(), 0);
        assert_eq!(
            sub.try_recv().unwrap(),
            StreamEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
    }

    #[test]
    fn test_tagged_messages_delivered() {
        let sink = StreamSink::new();
        let sub = sink.subscribe(StreamFilter::all());

        sink.handle(&added(1, "cart"));
        sink.handle(&TimelineEvent::RecordsCleared);
        sink.handle(&TimelineEvent::PauseChanged(true));

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            StreamEvent::Message(WireMessage::Record(r)) if r.id == RecordId(1)
        ));
        assert_eq!(events[1], StreamEvent::Message(WireMessage::Clear));
    }

    #[test]
    fn test_origin_filter() {
        let sink = StreamSink::new();
        let sub = sink.subscribe(StreamFilter::origins(vec!["auth".into()]));

        sink.handle(&added(1, "cart"));
        sink.handle(&added(2, "auth"));
        sink.handle(&TimelineEvent::RecordsCleared);

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            StreamEvent::Message(WireMessage::Record(r)) if r.origin == "auth"
        ));
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let sink = StreamSink::with_config(StreamConfig { buffer_size: 2 });
        let _sub = sink.subscribe(StreamFilter::all());

        for i in 0..10 {
            sink.handle(&added(i, "cart"));
        }

        assert_eq!(sink.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_removed() {
        let sink = StreamSink::new();
        let sub = sink.subscribe(StreamFilter::all());
        drop(sub);

        sink.handle(&added(1, "cart"));
        assert_eq!(sink.subscriber_count(), 0);
    }
}
