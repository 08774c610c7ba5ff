//! # Statetrail
//!
//! Capture state changes from an application, keep them in a bounded
//! timeline with structural diffs, and broadcast them to observers.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: arbitrary state normalized into JSON-safe trees
//! - **Diffs**: ordered, capped path-level differences between snapshots
//! - **Timeline**: bounded, append-ordered records with pins and annotations
//! - **Analytics**: per-kind and per-origin counts and cadence
//! - **Sinks**: in-process streams, a remote socket mirror, and an event bus
//!
//! ## Example
//!
//! ```ignore
//! use statetrail::{CaptureInput, Timeline, TimelineConfig};
//! use serde_json::json;
//!
//! let timeline = Timeline::new(TimelineConfig::default())?;
//!
//! timeline.capture(CaptureInput::update("counter", "init").with_state(json!({"value": 0})));
//! let record = timeline
//!     .capture(CaptureInput::update("counter", "increment").with_state(json!({"value": 1})))
//!     .unwrap();
//!
//! assert_eq!(record.diffs[0].path_string(), "$.value");
//! timeline.pin(record.id)?;
//! timeline.save_session("./session.json", Some("bug #12"))?;
//! ```

pub mod analytics;
pub mod companion;
pub mod config;
pub mod diff;
pub mod error;
mod serde_util;
pub mod sinks;
pub mod snapshot;
pub mod timeline;
pub mod types;

// Re-exports
pub use analytics::{AnalyticsSnapshot, OriginStats};
pub use companion::{CompanionHandle, CompanionServer};
pub use config::{EventBusConfig, RemoteSinkConfig, StreamConfig, TimelineConfig};
pub use diff::{diff_snapshots, diff_values, DiffEntry, DiffKind, PathSegment};
pub use error::{Result, TimelineError};
pub use sinks::{
    BusEvent, BusPayload, DropReason, EventBus, FnSink, RemoteSocketSink, SinkId, SinkStatus,
    StreamEvent, StreamFilter, StreamSink, StreamSubscription, SubscriptionId, TimelineEvent,
    TimelineSink, WireMessage,
};
pub use snapshot::{SharedState, Snapshot, SnapshotBuilder, StateValue};
pub use timeline::{ImportSummary, RecordFilter, Session, Timeline};
pub use types::*;
