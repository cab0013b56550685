use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime, to_i64},
    models::EventRecord,
    Database,
};

fn row_to_event(row: &Row) -> Result<EventRecord> {
    let timestamp: String = row.get("timestamp")?;

    Ok(EventRecord {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        content: row.get("content")?,
    })
}

impl Database {
    pub async fn insert_event(&self, event: &EventRecord) -> Result<()> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO events (id, timestamp, content) VALUES (?1, ?2, ?3)",
                params![record.id, format_datetime(&record.timestamp), record.content],
            )
            .with_context(|| "failed to insert event")?;
            Ok(())
        })
        .await
    }

    /// Newest first. Rows sharing a timestamp come back in reverse insertion order.
    pub async fn get_recent_events(&self, limit: u64) -> Result<Vec<EventRecord>> {
        let limit = to_i64(limit)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, content
                 FROM events
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }

            Ok(events)
        })
        .await
    }
}
