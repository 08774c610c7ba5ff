//! Snapshot building: normalizes arbitrary state values into JSON-safe trees.
//!
//! [`StateValue`] is the closed set of shapes the builder understands. It is
//! the only place the crate inspects the runtime shape of captured state;
//! everything downstream works on [`Snapshot::structured`].

mod builder;
mod value;

pub use builder::{
    truncate_summary, Snapshot, SnapshotBuilder, CYCLE_MARKER, DEFAULT_SUMMARY_CHARS,
    MAX_DEPTH_MARKER,
};
pub use value::{OpaqueValue, SharedState, StateValue};
