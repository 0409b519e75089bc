//! Row store — the singleton rows that hold the shared text and the last
//! canvas snapshot.
//!
//! DESIGN
//! ======
//! Both documents live in row `id = 1` of a configurable table. Writes are
//! whole-value replacements stamped with `updated_at`; the store applies them
//! in arrival order, which is the last-writer-wins rule both engines rely on.
//! [`postgrest::PostgrestStore`] talks to the hosted REST endpoint;
//! [`memory::MemoryStore`] is the in-process stand-in used by tests.
//!
//! ERROR HANDLING
//! ==============
//! Every operation returns [`StoreError`]. Callers on the sync path log and
//! surface the error as a status; nothing here retries.

pub mod memory;
pub mod postgrest;

use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

/// Primary key of the only row either document uses.
pub const SINGLETON_ID: i64 = 1;

pub const DEFAULT_TABLE: &str = "shared_content";
pub const DEFAULT_TEXT_COLUMN: &str = "text_note";
pub const DEFAULT_SNAPSHOT_COLUMN: &str = "image_data";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The singleton row does not exist.
    #[error("row {id} not found in {table}")]
    NotFound { table: String, id: i64 },

    /// The HTTP request could not be sent or its body could not be read.
    #[error("store request failed: {0}")]
    Request(String),

    /// The store answered with a non-success status.
    #[error("store response error: status {status}")]
    Response { status: u16, body: String },

    /// The response body was not the expected row shape.
    #[error("store response parse failed: {0}")]
    Parse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The store refused the operation without reaching a backend.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl frames::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "E_STORE_NOT_FOUND",
            Self::Request(_) => "E_STORE_REQUEST",
            Self::Response { .. } => "E_STORE_RESPONSE",
            Self::Parse(_) => "E_STORE_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::Unavailable(_) | Self::Response { status: 429 | 500..=599, .. }
        )
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Where the two documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub text_table: String,
    pub text_column: String,
    pub snapshot_table: String,
    pub snapshot_column: String,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            text_table: DEFAULT_TABLE.into(),
            text_column: DEFAULT_TEXT_COLUMN.into(),
            snapshot_table: DEFAULT_TABLE.into(),
            snapshot_column: DEFAULT_SNAPSHOT_COLUMN.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub layout: TableLayout,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// The shared text as stored. `text` is never null; a null column reads as "".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedTextDocument {
    pub id: i64,
    pub text: String,
    pub updated_at: Option<OffsetDateTime>,
}

/// The last persisted canvas raster, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasSnapshot {
    pub id: i64,
    pub image_data_uri: Option<String>,
    pub updated_at: Option<OffsetDateTime>,
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Table and column names this store reads and writes.
    fn layout(&self) -> &TableLayout;

    async fn fetch_text(&self) -> Result<SharedTextDocument, StoreError>;

    /// Replace the shared text and stamp `updated_at`.
    async fn update_text(&self, text: &str) -> Result<(), StoreError>;

    async fn fetch_snapshot(&self) -> Result<CanvasSnapshot, StoreError>;

    /// Replace the snapshot. `None` clears it.
    async fn update_snapshot(&self, image_data_uri: Option<&str>) -> Result<(), StoreError>;
}
