//! Shared frame model and JSON codec for the realtime websocket transport.
//!
//! This crate owns the wire representation spoken between `ghostsync` and the
//! hosted realtime service: a Phoenix-style `{topic, event, payload, ref,
//! join_ref}` object sent as a JSON text message. Payloads stay flexible
//! (`serde_json::Value`); typed interpretation happens in the channel layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// EVENT CONSTANTS
// =============================================================================

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_BROADCAST: &str = "broadcast";
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_PRESENCE_STATE: &str = "presence_state";
pub const EVENT_PRESENCE_DIFF: &str = "presence_diff";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

/// Topic used for connection-level heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Every channel topic on the wire carries this prefix.
pub const TOPIC_PREFIX: &str = "realtime:";

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text could not be decoded as a JSON frame.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
    /// The frame decoded but carried an empty topic.
    #[error("frame has empty topic")]
    EmptyTopic,
}

/// Grepable error code and retryable flag shared by every error type in the
/// workspace.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

impl ErrorCode for CodecError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_FRAME_DECODE",
            Self::EmptyTopic => "E_FRAME_TOPIC",
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Classification of a frame by its `event` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Join,
    Leave,
    Reply,
    Error,
    Close,
    Heartbeat,
    Broadcast,
    Presence,
    PresenceState,
    PresenceDiff,
    RowChange,
    System,
    /// Any event this client does not interpret.
    Other,
}

impl Kind {
    #[must_use]
    pub fn from_event(event: &str) -> Self {
        match event {
            EVENT_JOIN => Self::Join,
            EVENT_LEAVE => Self::Leave,
            EVENT_REPLY => Self::Reply,
            EVENT_ERROR => Self::Error,
            EVENT_CLOSE => Self::Close,
            EVENT_HEARTBEAT => Self::Heartbeat,
            EVENT_BROADCAST => Self::Broadcast,
            EVENT_PRESENCE => Self::Presence,
            EVENT_PRESENCE_STATE => Self::PresenceState,
            EVENT_PRESENCE_DIFF => Self::PresenceDiff,
            EVENT_POSTGRES_CHANGES => Self::RowChange,
            EVENT_SYSTEM => Self::System,
            _ => Self::Other,
        }
    }
}

/// Outcome carried by a `phx_reply` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// A single message on the realtime wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Full wire topic, e.g. `"realtime:drawing-session"`.
    pub topic: String,
    /// Event name, e.g. `"broadcast"` or `"phx_join"`.
    pub event: String,
    /// Arbitrary JSON payload.
    #[serde(default = "empty_object")]
    pub payload: Value,
    /// Message reference used to correlate replies.
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    /// Reference of the join that opened this channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Prefix a channel name into its wire topic. Already-prefixed names pass through.
#[must_use]
pub fn wire_topic(channel: &str) -> String {
    if channel.starts_with(TOPIC_PREFIX) || channel == PHOENIX_TOPIC {
        channel.to_owned()
    } else {
        format!("{TOPIC_PREFIX}{channel}")
    }
}

impl Frame {
    /// Create a frame on a channel. The channel name is prefixed automatically.
    pub fn new(channel: &str, event: impl Into<String>, payload: Value) -> Self {
        Self { topic: wire_topic(channel), event: event.into(), payload, reference: None, join_ref: None }
    }

    /// Join request carrying the channel config and access token.
    #[must_use]
    pub fn join(channel: &str, config: Value, access_token: &str) -> Self {
        Self::new(
            channel,
            EVENT_JOIN,
            serde_json::json!({ "config": config, "access_token": access_token }),
        )
    }

    /// Leave request for a joined channel.
    #[must_use]
    pub fn leave(channel: &str) -> Self {
        Self::new(channel, EVENT_LEAVE, empty_object())
    }

    /// Connection keep-alive. Always sent on the `phoenix` topic.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(PHOENIX_TOPIC, EVENT_HEARTBEAT, empty_object())
    }

    /// Broadcast an application event to the other subscribers of a channel.
    #[must_use]
    pub fn broadcast(channel: &str, event: &str, payload: Value) -> Self {
        Self::new(
            channel,
            EVENT_BROADCAST,
            serde_json::json!({ "type": EVENT_BROADCAST, "event": event, "payload": payload }),
        )
    }

    /// Track (announce or re-announce) this client's presence state.
    #[must_use]
    pub fn track(channel: &str, state: Value) -> Self {
        Self::new(
            channel,
            EVENT_PRESENCE,
            serde_json::json!({ "type": EVENT_PRESENCE, "event": "track", "payload": state }),
        )
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn with_join_ref(mut self, join_ref: impl Into<String>) -> Self {
        self.join_ref = Some(join_ref.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Channel name with the wire prefix stripped.
    #[must_use]
    pub fn channel(&self) -> &str {
        self.topic.strip_prefix(TOPIC_PREFIX).unwrap_or(&self.topic)
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        Kind::from_event(&self.event)
    }

    /// Reply status for `phx_reply` frames; `None` for every other event.
    #[must_use]
    pub fn reply_status(&self) -> Option<ReplyStatus> {
        if self.kind() != Kind::Reply {
            return None;
        }
        match self.payload.get("status").and_then(Value::as_str) {
            Some("ok") => Some(ReplyStatus::Ok),
            _ => Some(ReplyStatus::Error),
        }
    }

    /// Inner application event name of a broadcast frame (`payload.event`).
    #[must_use]
    pub fn broadcast_event(&self) -> Option<&str> {
        if self.kind() != Kind::Broadcast {
            return None;
        }
        self.payload.get("event").and_then(Value::as_str)
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a frame into JSON text.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    // Serializing a struct of strings and `Value`s cannot fail; the fallback
    // only exists to keep the signature infallible.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode JSON text into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON and
/// [`CodecError::EmptyTopic`] when the topic is blank.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    let frame: Frame = serde_json::from_str(text)?;
    if frame.topic.is_empty() {
        return Err(CodecError::EmptyTopic);
    }
    Ok(frame)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
