//! The bounded record timeline, its queries, and session persistence.

mod query;
mod session;
mod store;

pub use query::RecordFilter;
pub use session::{ImportSummary, Session, SESSION_VERSION};
pub use store::Timeline;
