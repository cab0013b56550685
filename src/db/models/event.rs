//! Event log record.
//!
//! One record per backend-serviced request that produced an answer. Records
//! are never updated or deleted.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Display format used by the `/events` endpoint, in server local time.
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    /// Second precision.
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl EventRecord {
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format(EVENT_TIMESTAMP_FORMAT)
            .to_string()
    }
}
