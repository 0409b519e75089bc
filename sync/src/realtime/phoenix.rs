//! Phoenix websocket client for the hosted realtime service.
//!
//! DESIGN
//! ======
//! One socket carries every channel. A writer task owns the sink and
//! interleaves outbound frames with heartbeats; a reader task decodes inbound
//! frames and routes them by topic to the subscription that joined it.
//! Translation from wire frames to [`ChannelEvent`]s is pure
//! ([`RouteState::translate`]) so it can be tested without a socket.
//!
//! Presence arrives as a full `presence_state` followed by incremental
//! `presence_diff`s; the route keeps the merged state and always emits the
//! whole list, so subscribers never deal with diffs.
//!
//! There is no reconnect. When the socket drops, every subscription receives
//! [`ChannelEvent::Closed`] and sends fail with [`ChannelError::Closed`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use frames::{Frame, Kind, ReplyStatus, decode_frame, encode_frame, wire_topic};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{ChannelConfig, ChannelError, ChannelEvent, Realtime, RealtimeChannel, Subscription};

pub const SOCKET_PATH: &str = "/realtime/v1/websocket";
pub const PROTOCOL_VSN: &str = "1.0.0";

const OUTBOUND_BUFFER: usize = 512;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Routes = Arc<Mutex<HashMap<String, Route>>>;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// `wss://<project>/realtime/v1/websocket`
    pub endpoint: String,
    pub api_key: String,
    pub heartbeat: Duration,
}

impl RealtimeConfig {
    #[must_use]
    pub fn socket_url(&self) -> String {
        format!("{}?apikey={}&vsn={PROTOCOL_VSN}", self.endpoint, self.api_key)
    }
}

/// Derive the websocket endpoint from the project's HTTP base URL.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidUrl`] unless the URL is `http://` or `https://`.
pub fn realtime_endpoint(base_url: &str) -> Result<String, ChannelError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}{SOCKET_PATH}"));
    }
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}{SOCKET_PATH}"));
    }
    Err(ChannelError::InvalidUrl(base_url.to_owned()))
}

// =============================================================================
// PRESENCE STATE
// =============================================================================

/// Presence metas keyed by presence key, merged from state and diff frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceState {
    entries: BTreeMap<String, Vec<Value>>,
}

impl PresenceState {
    /// Replace everything with a `presence_state` payload.
    pub fn replace(&mut self, state: &Value) {
        self.entries.clear();
        let Some(keys) = state.as_object() else {
            return;
        };
        for (key, entry) in keys {
            let metas = metas_of(entry);
            if !metas.is_empty() {
                self.entries.insert(key.clone(), metas);
            }
        }
    }

    /// Merge a `presence_diff` payload: joins first, then leaves.
    pub fn apply_diff(&mut self, diff: &Value) {
        if let Some(joins) = diff.get("joins").and_then(Value::as_object) {
            for (key, entry) in joins {
                let joined = metas_of(entry);
                let slot = self.entries.entry(key.clone()).or_default();
                let joined_refs: Vec<&str> = joined.iter().filter_map(phx_ref).collect();
                slot.retain(|meta| phx_ref(meta).is_none_or(|r| !joined_refs.contains(&r)));
                slot.extend(joined.iter().cloned());
            }
        }

        if let Some(leaves) = diff.get("leaves").and_then(Value::as_object) {
            for (key, entry) in leaves {
                let left_refs: Vec<String> = metas_of(entry)
                    .iter()
                    .filter_map(phx_ref)
                    .map(str::to_owned)
                    .collect();
                let Some(slot) = self.entries.get_mut(key) else {
                    continue;
                };
                if left_refs.is_empty() {
                    slot.clear();
                } else {
                    slot.retain(|meta| phx_ref(meta).is_none_or(|r| !left_refs.iter().any(|l| l == r)));
                }
                if slot.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
    }

    /// Every tracked meta, ordered by presence key.
    #[must_use]
    pub fn list(&self) -> Vec<Value> {
        self.entries.values().flatten().cloned().collect()
    }
}

fn metas_of(entry: &Value) -> Vec<Value> {
    entry
        .get("metas")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn phx_ref(meta: &Value) -> Option<&str> {
    meta.get("phx_ref").and_then(Value::as_str)
}

// =============================================================================
// ROUTING
// =============================================================================

/// Per-topic state the reader keeps between frames.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteState {
    join_ref: String,
    presence: PresenceState,
}

impl RouteState {
    #[must_use]
    pub fn new(join_ref: impl Into<String>) -> Self {
        Self { join_ref: join_ref.into(), presence: PresenceState::default() }
    }

    /// Turn one inbound frame into the event a subscriber should see.
    pub fn translate(&mut self, frame: &Frame) -> Option<ChannelEvent> {
        match frame.kind() {
            Kind::Reply => {
                if frame.reference.as_deref() != Some(self.join_ref.as_str()) {
                    return None;
                }
                match frame.reply_status() {
                    Some(ReplyStatus::Ok) => Some(ChannelEvent::Subscribed),
                    _ => Some(ChannelEvent::Rejected(reply_reason(&frame.payload))),
                }
            }
            Kind::Broadcast => {
                let event = frame.broadcast_event()?.to_owned();
                let payload = frame.payload.get("payload").cloned().unwrap_or(Value::Null);
                Some(ChannelEvent::Broadcast { event, payload })
            }
            Kind::PresenceState => {
                self.presence.replace(&frame.payload);
                Some(ChannelEvent::PresenceSync(self.presence.list()))
            }
            Kind::PresenceDiff => {
                self.presence.apply_diff(&frame.payload);
                Some(ChannelEvent::PresenceSync(self.presence.list()))
            }
            Kind::RowChange => {
                let data = frame.payload.get("data")?;
                let table = data.get("table").and_then(Value::as_str)?.to_owned();
                let record = data.get("record").filter(|r| r.is_object())?.clone();
                Some(ChannelEvent::RowChanged { table, record })
            }
            Kind::Error | Kind::Close => Some(ChannelEvent::Closed),
            _ => None,
        }
    }
}

fn reply_reason(payload: &Value) -> String {
    payload
        .get("response")
        .and_then(|r| r.get("reason"))
        .and_then(Value::as_str)
        .map_or_else(|| payload.to_string(), str::to_owned)
}

struct Route {
    state: RouteState,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

fn lock(routes: &Routes) -> MutexGuard<'_, HashMap<String, Route>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch(routes: &Routes, frame: &Frame) {
    let mut routes = lock(routes);
    let Some(route) = routes.get_mut(&frame.topic) else {
        debug!(topic = %frame.topic, event = %frame.event, "frame for unjoined topic");
        return;
    };
    if let Some(event) = route.state.translate(frame) {
        if route.tx.send(event).is_err() {
            debug!(topic = %frame.topic, "subscriber gone, event discarded");
        }
    }
}

fn close_all(routes: &Routes) {
    for (topic, route) in lock(routes).drain() {
        if route.tx.send(ChannelEvent::Closed).is_err() {
            debug!(%topic, "subscriber gone before close");
        }
    }
}

fn next_ref(refs: &AtomicU64) -> String {
    (refs.fetch_add(1, Ordering::Relaxed) + 1).to_string()
}

// =============================================================================
// SOCKET TASKS
// =============================================================================

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Frame>,
    heartbeat: Duration,
    refs: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = ticker.tick() => Frame::heartbeat().with_ref(next_ref(&refs)),
        };
        if let Err(e) = sink.send(Message::Text(encode_frame(&frame).into())).await {
            warn!(error = %e, "realtime write failed");
            break;
        }
    }

    let _ = sink.close().await;
    debug!("realtime writer stopped");
}

async fn read_loop(mut source: SplitStream<WsStream>, routes: Routes) {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "realtime read failed");
                break;
            }
        };
        match decode_frame(text.as_str()) {
            Ok(frame) => dispatch(&routes, &frame),
            Err(e) => warn!(error = %e, "dropping undecodable realtime frame"),
        }
    }

    info!("realtime socket closed");
    close_all(&routes);
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct PhoenixClient {
    outbound: mpsc::Sender<Frame>,
    routes: Routes,
    refs: Arc<AtomicU64>,
    api_key: String,
}

impl PhoenixClient {
    /// Open the socket and start the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connect`] if the websocket handshake fails.
    pub async fn connect(config: RealtimeConfig) -> Result<Self, ChannelError> {
        let (stream, _) = connect_async(config.socket_url())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (sink, source) = stream.split();

        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let routes: Routes = Arc::default();
        let refs = Arc::new(AtomicU64::new(0));

        tokio::spawn(write_loop(sink, rx, config.heartbeat, refs.clone()));
        tokio::spawn(read_loop(source, routes.clone()));

        info!(endpoint = %config.endpoint, "realtime socket connected");
        Ok(Self { outbound, routes, refs, api_key: config.api_key })
    }
}

#[async_trait]
impl Realtime for PhoenixClient {
    async fn subscribe(&self, name: &str, config: ChannelConfig) -> Result<Subscription, ChannelError> {
        let topic = wire_topic(name);
        let join_ref = next_ref(&self.refs);
        let (tx, events) = mpsc::unbounded_channel();
        lock(&self.routes).insert(topic.clone(), Route { state: RouteState::new(join_ref.clone()), tx });

        let join = Frame::join(name, config.to_join_config(), &self.api_key)
            .with_ref(join_ref.clone())
            .with_join_ref(join_ref.clone());
        if self.outbound.send(join).await.is_err() {
            lock(&self.routes).remove(&topic);
            return Err(ChannelError::Closed);
        }
        debug!(%topic, %join_ref, "join sent");

        let channel = PhoenixChannel {
            name: name.to_owned(),
            topic,
            join_ref,
            outbound: self.outbound.clone(),
            routes: self.routes.clone(),
            refs: self.refs.clone(),
            left: AtomicBool::new(false),
        };
        Ok(Subscription { channel: Arc::new(channel), events })
    }
}

// =============================================================================
// CHANNEL HANDLE
// =============================================================================

/// A joined topic on a [`PhoenixClient`] socket. Dropping the handle leaves.
pub struct PhoenixChannel {
    name: String,
    topic: String,
    join_ref: String,
    outbound: mpsc::Sender<Frame>,
    routes: Routes,
    refs: Arc<AtomicU64>,
    left: AtomicBool,
}

impl PhoenixChannel {
    async fn push(&self, frame: Frame) -> Result<(), ChannelError> {
        if self.left.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        let frame = frame
            .with_ref(next_ref(&self.refs))
            .with_join_ref(self.join_ref.clone());
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    fn detach(&self) -> bool {
        if self.left.swap(true, Ordering::AcqRel) {
            return false;
        }
        lock(&self.routes).remove(&self.topic);
        true
    }
}

#[async_trait]
impl RealtimeChannel for PhoenixChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        self.push(Frame::broadcast(&self.name, event, payload)).await
    }

    async fn track(&self, state: Value) -> Result<(), ChannelError> {
        self.push(Frame::track(&self.name, state)).await
    }

    async fn leave(&self) {
        if self.detach() {
            let frame = Frame::leave(&self.name).with_ref(next_ref(&self.refs));
            if self.outbound.send(frame).await.is_err() {
                debug!(topic = %self.topic, "socket gone before leave");
            }
        }
    }
}

impl Drop for PhoenixChannel {
    fn drop(&mut self) {
        if self.detach() {
            let frame = Frame::leave(&self.name).with_ref(next_ref(&self.refs));
            let _ = self.outbound.try_send(frame);
        }
    }
}

#[cfg(test)]
#[path = "phoenix_test.rs"]
mod tests;
