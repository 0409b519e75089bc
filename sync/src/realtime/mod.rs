//! Realtime — named pub/sub channels with broadcast, presence, and row-change
//! feeds.
//!
//! DESIGN
//! ======
//! A [`Realtime`] backend hands out [`Subscription`]s: an outbound
//! [`RealtimeChannel`] handle plus an inbound stream of [`ChannelEvent`]s.
//! Drivers never see wire frames. [`phoenix::PhoenixClient`] speaks the hosted
//! websocket protocol; [`local::LocalHub`] routes everything in-process so two
//! sessions can be exercised inside one test.
//!
//! Delivery is fire-and-forget: a send only reports whether the message was
//! handed to the transport.

pub mod local;
pub mod phoenix;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::store::SINGLETON_ID;

/// Channel carrying row-change notifications for the shared text.
pub const NOTE_CHANNEL: &str = "note-changes";
/// Channel carrying stroke/clear broadcasts and drawing presence.
pub const DRAWING_CHANNEL: &str = "drawing-session";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("invalid realtime URL: {0}")]
    InvalidUrl(String),
    #[error("channel closed")]
    Closed,
}

impl frames::ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "E_CHANNEL_CONNECT",
            Self::InvalidUrl(_) => "E_CHANNEL_URL",
            Self::Closed => "E_CHANNEL_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Connection state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
}

/// Subscribe to changes of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub schema: String,
    pub table: String,
    pub id: i64,
}

impl RowFilter {
    #[must_use]
    pub fn singleton(table: &str) -> Self {
        Self { schema: "public".into(), table: table.to_owned(), id: SINGLETON_ID }
    }

    /// Whether a changed record belongs to this filter.
    #[must_use]
    pub fn matches(&self, table: &str, record: &Value) -> bool {
        self.table == table && record.get("id").and_then(Value::as_i64) == Some(self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Deliver this client's own broadcasts back to it.
    pub broadcast_self: bool,
    /// Key this client's presence is tracked under.
    pub presence_key: Option<String>,
    pub row_changes: Vec<RowFilter>,
}

impl ChannelConfig {
    /// Channel that only carries row changes.
    #[must_use]
    pub fn rows(filter: RowFilter) -> Self {
        Self { row_changes: vec![filter], ..Self::default() }
    }

    /// Broadcast channel with presence keyed by `key`; own broadcasts excluded.
    #[must_use]
    pub fn broadcast_with_presence(key: &str) -> Self {
        Self { broadcast_self: false, presence_key: Some(key.to_owned()), row_changes: Vec::new() }
    }

    /// The `config` object sent with a join request.
    #[must_use]
    pub fn to_join_config(&self) -> Value {
        let row_changes: Vec<Value> = self
            .row_changes
            .iter()
            .map(|filter| {
                json!({
                    "event": "*",
                    "schema": filter.schema,
                    "table": filter.table,
                    "filter": format!("id=eq.{}", filter.id),
                })
            })
            .collect();
        json!({
            "broadcast": { "self": self.broadcast_self, "ack": false },
            "presence": { "key": self.presence_key.clone().unwrap_or_default() },
            "postgres_changes": row_changes,
        })
    }
}

/// Everything a subscriber can observe on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The join was acknowledged.
    Subscribed,
    /// The join was refused.
    Rejected(String),
    /// Application broadcast from another subscriber.
    Broadcast { event: String, payload: Value },
    /// Full presence state after any join, leave, or re-track.
    PresenceSync(Vec<Value>),
    /// A filtered row changed; `record` is the new row.
    RowChanged { table: String, record: Value },
    /// The transport went away.
    Closed,
}

// =============================================================================
// TRAITS
// =============================================================================

/// Outbound half of a subscription.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Broadcast `payload` under `event` to the other subscribers.
    async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError>;

    /// Announce or re-announce this client's presence state.
    async fn track(&self, state: Value) -> Result<(), ChannelError>;

    /// Leave the channel. Further sends fail with [`ChannelError::Closed`].
    async fn leave(&self);
}

pub struct Subscription {
    pub channel: Arc<dyn RealtimeChannel>,
    /// Inbound events in arrival order. Unbounded: a slow subscriber delays
    /// events, it never loses them.
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
pub trait Realtime: Send + Sync {
    async fn subscribe(&self, name: &str, config: ChannelConfig) -> Result<Subscription, ChannelError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
