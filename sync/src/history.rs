//! Canvas history — where the sketchpad's persisted state lives.
//!
//! The canvas keeps no stroke log. What survives a session is the latest
//! lossy raster, written to the snapshot row. [`CanvasHistory`] is the seam
//! the canvas driver talks to, so a different persistence model can replace
//! the snapshot row without touching the stroke engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::store::{RowStore, StoreError};

#[async_trait]
pub trait CanvasHistory: Send + Sync {
    /// Persist the current raster.
    async fn record(&self, data_uri: &str) -> Result<(), StoreError>;

    /// Latest persisted raster, if any.
    async fn latest(&self) -> Result<Option<String>, StoreError>;

    /// Forget everything (confirmed clear).
    async fn reset(&self) -> Result<(), StoreError>;
}

/// [`CanvasHistory`] backed by the singleton snapshot row.
pub struct SnapshotHistory {
    store: Arc<dyn RowStore>,
}

impl SnapshotHistory {
    #[must_use]
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CanvasHistory for SnapshotHistory {
    async fn record(&self, data_uri: &str) -> Result<(), StoreError> {
        debug!(bytes = data_uri.len(), "recording canvas snapshot");
        self.store.update_snapshot(Some(data_uri)).await
    }

    async fn latest(&self) -> Result<Option<String>, StoreError> {
        let snapshot = self.store.fetch_snapshot().await?;
        Ok(snapshot.image_data_uri)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.store.update_snapshot(None).await
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
