//! Configuration for the timeline and its sinks.
//!
//! Every struct has a `Default` and deserializes with all fields optional, so
//! a host can keep a partial JSON document and fill the rest from defaults.

use crate::error::{Result, TimelineError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeline configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelineConfig {
    /// Maximum number of records retained. Oldest records are evicted first.
    pub max_records: usize,

    /// Maximum diff entries stored per record.
    pub max_diff_entries: usize,

    /// Recursion depth at which snapshot normalization stops.
    pub max_snapshot_depth: usize,

    /// Character budget for snapshot summaries.
    pub summary_max_chars: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_records: 500,
            max_diff_entries: 250,
            max_snapshot_depth: 8,
            summary_max_chars: 200,
        }
    }
}

impl TimelineConfig {
    /// Config with a custom capacity and default limits otherwise.
    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            max_records,
            ..Default::default()
        }
    }

    /// Parse a (possibly partial) JSON config document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| TimelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_records == 0 {
            return Err(TimelineError::InvalidConfig(
                "maxRecords must be greater than zero".into(),
            ));
        }
        if self.summary_max_chars == 0 {
            return Err(TimelineError::InvalidConfig(
                "summaryMaxChars must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the in-process stream sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    /// Max buffered messages per subscriber before it is dropped.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Configuration for a remote socket sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteSinkConfig {
    /// `tcp://host:port` or `host:port`.
    pub uri: String,

    /// Upper bound on the connect handshake.
    #[serde(with = "crate::serde_util::duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for RemoteSinkConfig {
    fn default() -> Self {
        Self {
            uri: "tcp://127.0.0.1:7878".into(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RemoteSinkConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

/// Configuration for the event bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventBusConfig {
    /// Broadcast channel capacity.
    pub capacity: usize,

    /// Publish an analytics event after this many mutations (0 = never).
    pub analytics_every: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            analytics_every: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TimelineConfig::from_json_str(r#"{"maxRecords": 3}"#).unwrap();
        assert_eq!(config.max_records, 3);
        assert_eq!(config.summary_max_chars, 200);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = TimelineConfig::from_json_str(r#"{"maxRecords": 0}"#);
        assert!(matches!(result, Err(TimelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_remote_timeout_in_millis() {
        let config: RemoteSinkConfig =
            serde_json::from_str(r#"{"uri": "tcp://10.0.0.2:9000", "connectTimeout": 250}"#)
                .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }
}
