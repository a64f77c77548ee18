//! Entities shared across the trust path: queue records, log messages, and
//! the derived stream-name scheme.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single log or metric line. `timestamp_ms` is the producer's wall-clock
/// millisecond epoch, or server-assigned if the producer sent `0`/absent.
/// `level` is not interpreted anywhere in the upload path — it is carried
/// opaquely when a producer sets one (currently only the gRPC ingress)
/// and `None` for ingress paths that have no such concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp_ms: i64,
    pub level: Option<i32>,
    pub message: String,
}

impl LogMessage {
    pub fn new(timestamp_ms: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            level: None,
            message: message.into(),
        }
    }

    pub fn with_level(timestamp_ms: i64, level: i32, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            level: Some(level),
            message: message.into(),
        }
    }

    /// The current wall clock in milliseconds since the epoch, used when a
    /// producer omits a timestamp.
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Which of the two remote log groups a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupType {
    Log,
    Metrics,
}

/// One item on the bounded MPSC queue between ingress and the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub group_type: GroupType,
    pub stream_suffix: String,
    pub message: LogMessage,
}

impl QueueRecord {
    pub fn new(group_type: GroupType, stream_suffix: impl Into<String>, message: LogMessage) -> Self {
        Self {
            group_type,
            stream_suffix: stream_suffix.into(),
            message,
        }
    }
}

/// `MAX_LOGS_PER_PUT`: a remote-API ceiling on events per `PutLogEvents` call.
pub const MAX_LOGS_PER_PUT: usize = 10_000;

/// Derived stream name: `"{YYYY}/{MM}/{DD}/{thing_name}/{stream_suffix}"` in
/// UTC of the upload instant, not message time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamName(String);

impl StreamName {
    pub fn compose(thing_name: &str, stream_suffix: &str, upload_instant: DateTime<Utc>) -> Self {
        Self(format!(
            "{}/{thing_name}/{stream_suffix}",
            upload_instant.format("%Y/%m/%d")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stream_name_uses_upload_instant_not_message_time() {
        let instant = Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap();
        let name = StreamName::compose("my-thing", "ecu-1", instant);
        assert_eq!(name.as_str(), "2026/07/29/my-thing/ecu-1");
    }
}
