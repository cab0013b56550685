//! Best-effort facade over the event store.
//!
//! Storage failures are logged here and never reach the request path: `append`
//! swallows write errors and `recent` degrades to an empty list.

use chrono::{SubsecRound, Utc};
use log::error;
use uuid::Uuid;

use crate::db::{Database, EventRecord};

pub const DEFAULT_RECENT_LIMIT: u64 = 20;

#[derive(Clone)]
pub struct EventLog {
    db: Database,
}

impl EventLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records `content` under a fresh id and the current second. Returns the
    /// record that was written, or `None` if the write failed.
    pub async fn append(&self, content: impl Into<String>) -> Option<EventRecord> {
        let record = EventRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().trunc_subsecs(0),
            content: content.into(),
        };

        match self.db.insert_event(&record).await {
            Ok(()) => Some(record),
            Err(err) => {
                error!("Error adding event: {err:#}");
                None
            }
        }
    }

    /// Up to `limit` records, most recent first.
    pub async fn recent(&self, limit: u64) -> Vec<EventRecord> {
        match self.db.get_recent_events(limit).await {
            Ok(events) => events,
            Err(err) => {
                error!("Error getting recent events: {err:#}");
                Vec::new()
            }
        }
    }
}
