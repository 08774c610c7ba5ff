//! Error types for the timeline.

use crate::types::RecordId;
use std::time::Duration;
use thiserror::Error;

/// Main error type for timeline operations.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Annotation {annotation} not found on record {record}")]
    AnnotationNotFound { record: RecordId, annotation: String },

    #[error("Attachment {attachment} not found on record {record}")]
    AttachmentNotFound { record: RecordId, attachment: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid sink URI: {0}")]
    InvalidUri(String),

    #[error("Connection to {uri} failed: {reason}")]
    Connection { uri: String, reason: String },

    #[error("Connection to {uri} timed out after {timeout:?}")]
    ConnectTimeout { uri: String, timeout: Duration },

    #[error("Sink has been disposed")]
    SinkDisposed,
}

impl From<serde_json::Error> for TimelineError {
    fn from(e: serde_json::Error) -> Self {
        TimelineError::Serialization(e.to_string())
    }
}

/// Result type for timeline operations.
pub type Result<T> = std::result::Result<T, TimelineError>;
