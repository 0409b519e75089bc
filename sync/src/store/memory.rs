//! In-memory row store.
//!
//! Holds the two singleton rows in process. When attached to a
//! [`LocalHub`], every successful write is published as a row change the way
//! the hosted database's change feed would: the full row, so a snapshot write
//! also carries the unchanged text, and the writer sees its own echo.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use super::postgrest::update_body;
use super::{CanvasSnapshot, RowStore, SINGLETON_ID, SharedTextDocument, StoreError, TableLayout};
use crate::realtime::local::LocalHub;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Rows>>,
    layout: TableLayout,
    feed: Option<LocalHub>,
}

#[derive(Default)]
struct Rows {
    text: String,
    text_updated_at: Option<OffsetDateTime>,
    snapshot: Option<String>,
    snapshot_updated_at: Option<OffsetDateTime>,
    text_writes: Vec<String>,
    snapshot_writes: usize,
    failing: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every write to `hub` as a row change.
    #[must_use]
    pub fn with_feed(mut self, hub: LocalHub) -> Self {
        self.feed = Some(hub);
        self
    }

    #[must_use]
    pub fn with_text(self, text: &str) -> Self {
        self.rows().text = text.to_owned();
        self
    }

    fn rows(&self) -> MutexGuard<'_, Rows> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.rows().failing = failing;
    }

    /// Every text value written, in arrival order.
    #[must_use]
    pub fn text_writes(&self) -> Vec<String> {
        self.rows().text_writes.clone()
    }

    #[must_use]
    pub fn snapshot_writes(&self) -> usize {
        self.rows().snapshot_writes
    }

    #[must_use]
    pub fn current_text(&self) -> String {
        self.rows().text.clone()
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Option<String> {
        self.rows().snapshot.clone()
    }

    fn check(rows: &Rows) -> Result<(), StoreError> {
        if rows.failing {
            return Err(StoreError::Unavailable("memory store set to fail".into()));
        }
        Ok(())
    }

    /// The whole row of `table` as the change feed would carry it: every
    /// column stored there, not only the one just written.
    fn row_record(&self, rows: &Rows, table: &str, at: OffsetDateTime) -> Result<Value, StoreError> {
        let mut record = update_body("id", Value::from(SINGLETON_ID), at)?;
        if table == self.layout.text_table {
            record.insert(self.layout.text_column.clone(), Value::String(rows.text.clone()));
        }
        if table == self.layout.snapshot_table {
            let snapshot = rows.snapshot.clone().map_or(Value::Null, Value::String);
            record.insert(self.layout.snapshot_column.clone(), snapshot);
        }
        Ok(Value::Object(record))
    }

    fn publish(&self, table: &str, record: Option<Value>) {
        if let (Some(hub), Some(record)) = (&self.feed, record) {
            hub.publish_row_change(table, &record);
        }
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    fn layout(&self) -> &TableLayout {
        &self.layout
    }

    async fn fetch_text(&self) -> Result<SharedTextDocument, StoreError> {
        let rows = self.rows();
        Self::check(&rows)?;
        Ok(SharedTextDocument { id: SINGLETON_ID, text: rows.text.clone(), updated_at: rows.text_updated_at })
    }

    async fn update_text(&self, text: &str) -> Result<(), StoreError> {
        let at = OffsetDateTime::now_utc();
        let record = {
            let mut rows = self.rows();
            Self::check(&rows)?;
            rows.text = text.to_owned();
            rows.text_updated_at = Some(at);
            rows.text_writes.push(text.to_owned());
            self.feed.as_ref().map(|_| self.row_record(&rows, &self.layout.text_table, at)).transpose()?
        };
        self.publish(&self.layout.text_table, record);
        Ok(())
    }

    async fn fetch_snapshot(&self) -> Result<CanvasSnapshot, StoreError> {
        let rows = self.rows();
        Self::check(&rows)?;
        Ok(CanvasSnapshot {
            id: SINGLETON_ID,
            image_data_uri: rows.snapshot.clone(),
            updated_at: rows.snapshot_updated_at,
        })
    }

    async fn update_snapshot(&self, image_data_uri: Option<&str>) -> Result<(), StoreError> {
        let at = OffsetDateTime::now_utc();
        let record = {
            let mut rows = self.rows();
            Self::check(&rows)?;
            rows.snapshot = image_data_uri.map(str::to_owned);
            rows.snapshot_updated_at = Some(at);
            rows.snapshot_writes += 1;
            self.feed.as_ref().map(|_| self.row_record(&rows, &self.layout.snapshot_table, at)).transpose()?
        };
        self.publish(&self.layout.snapshot_table, record);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
