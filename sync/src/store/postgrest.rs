//! PostgREST client for the singleton rows.
//!
//! Thin HTTP wrapper over `/rest/v1/{table}?id=eq.1`. Row parsing and body
//! construction are pure functions so they can be tested without a server.

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{CanvasSnapshot, RowStore, SINGLETON_ID, SharedTextDocument, StoreConfig, StoreError, TableLayout};

const UPDATED_AT: &str = "updated_at";
const PREFER_MINIMAL: &str = "return=minimal";

// =============================================================================
// CLIENT
// =============================================================================

pub struct PostgrestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    layout: TableLayout,
}

impl PostgrestStore {
    /// Build a client with the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StoreError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            layout: config.layout,
        })
    }

    async fn select_row(&self, table: &str, column: &str) -> Result<Map<String, Value>, StoreError> {
        let response = self
            .http
            .get(row_url(&self.base_url, table))
            .query(&[("select", select_columns(column))])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(StoreError::Response { status, body: text });
        }

        take_row(&text, table)
    }

    async fn patch_row(&self, table: &str, column: &str, value: Value) -> Result<(), StoreError> {
        let body = update_body(column, value, OffsetDateTime::now_utc())?;

        let response = self
            .http
            .patch(row_url(&self.base_url, table))
            .header("apikey", &self.api_key)
            .header("Prefer", PREFER_MINIMAL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Response { status, body });
        }

        tracing::debug!(%table, %column, status, "row updated");
        Ok(())
    }
}

#[async_trait]
impl RowStore for PostgrestStore {
    fn layout(&self) -> &TableLayout {
        &self.layout
    }

    async fn fetch_text(&self) -> Result<SharedTextDocument, StoreError> {
        let row = self
            .select_row(&self.layout.text_table, &self.layout.text_column)
            .await?;
        parse_text_row(&row, &self.layout.text_column)
    }

    async fn update_text(&self, text: &str) -> Result<(), StoreError> {
        self.patch_row(&self.layout.text_table, &self.layout.text_column, Value::String(text.to_owned()))
            .await
    }

    async fn fetch_snapshot(&self) -> Result<CanvasSnapshot, StoreError> {
        let row = self
            .select_row(&self.layout.snapshot_table, &self.layout.snapshot_column)
            .await?;
        parse_snapshot_row(&row, &self.layout.snapshot_column)
    }

    async fn update_snapshot(&self, image_data_uri: Option<&str>) -> Result<(), StoreError> {
        let value = image_data_uri.map_or(Value::Null, |uri| Value::String(uri.to_owned()));
        self.patch_row(&self.layout.snapshot_table, &self.layout.snapshot_column, value)
            .await
    }
}

// =============================================================================
// REQUEST SHAPES
// =============================================================================

fn row_url(base_url: &str, table: &str) -> String {
    format!("{base_url}/rest/v1/{table}?id=eq.{SINGLETON_ID}")
}

fn select_columns(column: &str) -> String {
    format!("id,{column},{UPDATED_AT}")
}

/// `{column: value, updated_at: <rfc3339>}`
pub(crate) fn update_body(column: &str, value: Value, at: OffsetDateTime) -> Result<Map<String, Value>, StoreError> {
    let stamp = at.format(&Rfc3339).map_err(|e| StoreError::Parse(e.to_string()))?;
    let mut body = Map::new();
    body.insert(column.to_owned(), value);
    body.insert(UPDATED_AT.to_owned(), Value::String(stamp));
    Ok(body)
}

// =============================================================================
// PARSING
// =============================================================================

fn take_row(json: &str, table: &str) -> Result<Map<String, Value>, StoreError> {
    let rows: Vec<Value> = serde_json::from_str(json).map_err(|e| StoreError::Parse(e.to_string()))?;
    match rows.into_iter().next() {
        Some(Value::Object(row)) => Ok(row),
        Some(other) => Err(StoreError::Parse(format!("expected row object, got {other}"))),
        None => Err(StoreError::NotFound { table: table.to_owned(), id: SINGLETON_ID }),
    }
}

pub(crate) fn parse_text_row(row: &Map<String, Value>, column: &str) -> Result<SharedTextDocument, StoreError> {
    let text = match row.get(column) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => return Err(StoreError::Parse(format!("{column} is not text: {other}"))),
    };
    Ok(SharedTextDocument { id: row_id(row), text, updated_at: parse_timestamp(row.get(UPDATED_AT)) })
}

pub(crate) fn parse_snapshot_row(row: &Map<String, Value>, column: &str) -> Result<CanvasSnapshot, StoreError> {
    let image_data_uri = match row.get(column) {
        None | Some(Value::Null) => None,
        Some(Value::String(uri)) if uri.is_empty() => None,
        Some(Value::String(uri)) => Some(uri.clone()),
        Some(other) => return Err(StoreError::Parse(format!("{column} is not text: {other}"))),
    };
    Ok(CanvasSnapshot { id: row_id(row), image_data_uri, updated_at: parse_timestamp(row.get(UPDATED_AT)) })
}

fn row_id(row: &Map<String, Value>) -> i64 {
    row.get("id").and_then(Value::as_i64).unwrap_or(SINGLETON_ID)
}

fn parse_timestamp(value: Option<&Value>) -> Option<OffsetDateTime> {
    let raw = value?.as_str()?;
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

#[cfg(test)]
#[path = "postgrest_test.rs"]
mod tests;
