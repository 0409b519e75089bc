//! Canvas session — drives a [`StrokeEngine`] and a [`PresenceTracker`]
//! against the drawing channel and the canvas history.
//!
//! Broadcasts and presence announcements are awaited inside the loop so they
//! leave in the order the pointer produced them. History calls run as
//! background operations; snapshots are advisory and may race with later
//! strokes.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::{COMMAND_BUFFER, Collaborators, SessionError};
use crate::config::Timings;
use crate::history::CanvasHistory;
use crate::identity::Identity;
use crate::presence::{PresenceChange, PresenceRecord, PresenceTracker};
use crate::raster::{Brush, Point, Size, Surface};
use crate::realtime::{ChannelConfig, ChannelEvent, ConnectionStatus, DRAWING_CHANNEL, RealtimeChannel};
use crate::store::StoreError;
use crate::stroke::{
    CLEAR_EVENT, ClearOutcome, DRAW_EVENT, ResizeOutcome, StrokeEngine, StrokeSegment, StrokeTimings,
};

// =============================================================================
// VIEW
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CanvasView {
    pub connection: ConnectionStatus,
    pub peer: Option<PresenceRecord>,
    /// The peer came online within the pulse window.
    pub peer_pulse: bool,
    pub clear_armed: bool,
    pub drawing: bool,
    pub pen_enabled: bool,
    pub brush: Brush,
    pub size: Size,
    /// The stored snapshot has been fetched (and painted, if there was one).
    pub restored: bool,
}

// =============================================================================
// HANDLE
// =============================================================================

type Inspect<S> = Box<dyn FnOnce(&S) + Send>;

enum Command<S> {
    Resize(Size),
    PointerDown(Point),
    PointerMove(Point),
    PointerUp,
    Clear(oneshot::Sender<ClearOutcome>),
    SetBrush { color: String, width: f64, reply: oneshot::Sender<Result<(), SessionError>> },
    SetPen(bool),
    Inspect(Inspect<S>),
    Flush,
    Shutdown(oneshot::Sender<()>),
}

/// Caller side of a running canvas session. Dropping it saves a pending
/// snapshot and ends the session.
pub struct CanvasHandle<S> {
    commands: mpsc::Sender<Command<S>>,
    view: watch::Receiver<CanvasView>,
    task: JoinHandle<()>,
}

impl<S: Surface + 'static> CanvasHandle<S> {
    async fn send(&self, command: Command<S>) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    /// Size (or re-size) the surface. The first sizing restores the latest
    /// stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn resize(&self, size: Size) -> Result<(), SessionError> {
        self.send(Command::Resize(size)).await
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn pointer_down(&self, at: Point) -> Result<(), SessionError> {
        self.send(Command::PointerDown(at)).await
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn pointer_move(&self, to: Point) -> Result<(), SessionError> {
        self.send(Command::PointerMove(to)).await
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn pointer_up(&self) -> Result<(), SessionError> {
        self.send(Command::PointerUp).await
    }

    /// Draw a whole line in one go: down, move, up.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn line(&self, from: Point, to: Point) -> Result<(), SessionError> {
        self.pointer_down(from).await?;
        self.pointer_move(to).await?;
        self.pointer_up().await
    }

    /// Press the clear button once.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn request_clear(&self) -> Result<ClearOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Clear(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Stroke`] for an invalid color or width.
    pub async fn set_brush(&self, color: impl Into<String>, width: f64) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetBrush { color: color.into(), width, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn set_pen_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.send(Command::SetPen(enabled)).await
    }

    /// Run `f` against the surface inside the session task.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R, SessionError>
    where
        R: Send + 'static,
        F: FnOnce(&S) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Inspect(Box::new(move |surface: &S| {
            let _ = reply.send(f(surface));
        })))
        .await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Save a pending snapshot now.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.send(Command::Flush).await
    }

    #[must_use]
    pub fn view(&self) -> CanvasView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CanvasView> {
        self.view.clone()
    }

    /// Save a pending snapshot, wait for history writes, leave the channel,
    /// and stop.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "canvas session task failed");
        }
    }
}

// =============================================================================
// SPAWN
// =============================================================================

pub struct CanvasSession;

impl CanvasSession {
    /// Join the drawing channel as `me` and spawn the driver over `surface`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Channel`] if the subscription fails.
    pub async fn spawn<S: Surface + 'static>(
        collaborators: &Collaborators,
        me: Identity,
        surface: S,
        timings: Timings,
    ) -> Result<CanvasHandle<S>, SessionError> {
        let subscription = collaborators
            .realtime
            .subscribe(DRAWING_CHANNEL, ChannelConfig::broadcast_with_presence(me.as_str()))
            .await?;

        let stroke_timings =
            StrokeTimings { snapshot_debounce: timings.snapshot_debounce, clear_confirm: timings.clear_confirm };
        let driver = CanvasDriver {
            engine: StrokeEngine::new(surface, stroke_timings),
            presence: PresenceTracker::new(me, timings.presence_pulse),
            history: collaborators.history.clone(),
            channel: subscription.channel,
            connection: ConnectionStatus::Connecting,
            restored: false,
            ops: FuturesUnordered::new(),
            view: None,
        };
        let (view_tx, view) = watch::channel(driver.snapshot_view(Instant::now()));
        let driver = CanvasDriver { view: Some(view_tx), ..driver };

        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(driver.run(command_rx, subscription.events));
        info!("canvas session started");
        Ok(CanvasHandle { commands, view, task })
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum CanvasOp {
    Restored(Result<Option<String>, StoreError>),
    Recorded(Result<(), StoreError>),
    Reset(Result<(), StoreError>),
}

struct CanvasDriver<S: Surface> {
    engine: StrokeEngine<S>,
    presence: PresenceTracker,
    history: Arc<dyn CanvasHistory>,
    channel: Arc<dyn RealtimeChannel>,
    connection: ConnectionStatus,
    restored: bool,
    ops: FuturesUnordered<BoxFuture<'static, CanvasOp>>,
    view: Option<watch::Sender<CanvasView>>,
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl<S: Surface + 'static> CanvasDriver<S> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command<S>>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        let mut events_open = true;
        let mut shutdown_ack = None;

        loop {
            let deadline = earliest(self.engine.next_deadline(), self.presence.next_deadline());
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        events_open = false;
                        self.connection = ConnectionStatus::Connecting;
                    }
                },
                Some(op) = self.ops.next(), if !self.ops.is_empty() => self.on_op(op),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }

            self.on_tick(Instant::now());
            self.publish();
        }

        if let Some(uri) = self.engine.flush_snapshot() {
            debug!("saving pending snapshot before shutdown");
            self.record(uri);
        }
        while let Some(op) = self.ops.next().await {
            self.on_op(op);
        }
        self.channel.leave().await;
        info!("canvas session stopped");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    fn on_tick(&mut self, now: Instant) {
        if self.engine.expire_clear(now) {
            debug!("clear confirmation expired");
        }
        if self.presence.poll(now) {
            debug!("peer pulse ended");
        }
        if let Some(uri) = self.engine.poll_snapshot(now) {
            self.record(uri);
        }
    }

    async fn on_command(&mut self, command: Command<S>) {
        let now = Instant::now();
        match command {
            Command::Resize(size) => {
                if self.engine.resize(size) == ResizeOutcome::NeedsSnapshot {
                    let history = self.history.clone();
                    self.ops.push(Box::pin(async move { CanvasOp::Restored(history.latest().await) }));
                }
            }
            Command::PointerDown(at) => {
                if self.engine.start_stroke(at) {
                    self.announce_drawing(true).await;
                }
            }
            Command::PointerMove(to) => {
                if let Some(segment) = self.engine.continue_stroke(to) {
                    broadcast_segment(self.channel.as_ref(), &segment).await;
                }
            }
            Command::PointerUp => {
                if self.engine.end_stroke(now) {
                    self.announce_drawing(false).await;
                }
            }
            Command::Clear(reply) => {
                let outcome = self.engine.request_clear(now);
                if outcome == ClearOutcome::Cleared {
                    info!("canvas cleared");
                    let history = self.history.clone();
                    self.ops.push(Box::pin(async move { CanvasOp::Reset(history.reset().await) }));
                    if let Err(e) = self.channel.send(CLEAR_EVENT, json!({})).await {
                        warn!(error = %e, "clear broadcast failed");
                    }
                }
                let _ = reply.send(outcome);
            }
            Command::SetBrush { color, width, reply } => {
                let _ = reply.send(self.engine.set_brush(&color, width).map_err(SessionError::from));
            }
            Command::SetPen(enabled) => {
                let was_drawing = self.engine.is_drawing();
                self.engine.set_pen_enabled(enabled);
                if was_drawing && !self.engine.is_drawing() {
                    self.announce_drawing(false).await;
                }
            }
            Command::Inspect(f) => f(self.engine.surface()),
            Command::Flush => {
                if let Some(uri) = self.engine.flush_snapshot() {
                    self.record(uri);
                }
            }
            Command::Shutdown(_) => {}
        }
    }

    async fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Subscribed => {
                info!(channel = DRAWING_CHANNEL, me = %self.presence.me(), "drawing channel subscribed");
                self.connection = ConnectionStatus::Connected;
                let announcement = self.presence.announcement();
                track(self.channel.as_ref(), &announcement).await;
            }
            ChannelEvent::Rejected(reason) => {
                warn!(channel = DRAWING_CHANNEL, %reason, "drawing channel rejected");
            }
            ChannelEvent::Broadcast { event, payload } => self.on_broadcast(&event, payload),
            ChannelEvent::PresenceSync(metas) => {
                if let PresenceChange::PeerJoined(peer) = self.presence.on_sync(&metas, Instant::now()) {
                    info!(peer = %peer.user, "peer came online");
                }
            }
            ChannelEvent::Closed => {
                warn!(channel = DRAWING_CHANNEL, "drawing channel closed");
                self.connection = ConnectionStatus::Connecting;
            }
            ChannelEvent::RowChanged { .. } => {}
        }
    }

    fn on_broadcast(&mut self, event: &str, payload: Value) {
        match event {
            DRAW_EVENT => {
                let segment = match serde_json::from_value::<StrokeSegment>(payload) {
                    Ok(segment) => segment,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed stroke");
                        return;
                    }
                };
                if let Err(e) = self.engine.on_remote_stroke(&segment) {
                    warn!(error = %e, "dropping remote stroke");
                }
            }
            CLEAR_EVENT => self.engine.on_remote_clear(),
            other => debug!(event = other, "ignoring broadcast"),
        }
    }

    fn on_op(&mut self, op: CanvasOp) {
        if matches!(op, CanvasOp::Restored(_)) {
            self.restored = true;
        }
        match op {
            CanvasOp::Restored(Ok(Some(uri))) => {
                if let Err(e) = self.engine.restore_snapshot(&uri) {
                    warn!(error = %e, "stored snapshot unreadable");
                }
            }
            CanvasOp::Restored(Ok(None)) => debug!("no stored snapshot"),
            CanvasOp::Restored(Err(e)) => warn!(error = %e, "snapshot fetch failed"),
            CanvasOp::Recorded(Err(e)) => warn!(error = %e, "snapshot save failed"),
            CanvasOp::Reset(Err(e)) => warn!(error = %e, "snapshot reset failed"),
            CanvasOp::Recorded(Ok(())) | CanvasOp::Reset(Ok(())) => {}
        }
    }

    fn record(&mut self, uri: String) {
        let history = self.history.clone();
        self.ops.push(Box::pin(async move { CanvasOp::Recorded(history.record(&uri).await) }));
    }

    async fn announce_drawing(&mut self, drawing: bool) {
        if let Some(record) = self.presence.set_drawing(drawing) {
            track(self.channel.as_ref(), &record).await;
        }
    }

    fn snapshot_view(&self, now: Instant) -> CanvasView {
        CanvasView {
            connection: self.connection,
            peer: self.presence.peer().cloned(),
            peer_pulse: self.presence.pulse_active(now),
            clear_armed: self.engine.clear_armed(now),
            drawing: self.engine.is_drawing(),
            pen_enabled: self.engine.pen_enabled(),
            brush: self.engine.brush().clone(),
            size: self.engine.surface().size(),
            restored: self.restored,
        }
    }

    fn publish(&self) {
        let Some(view) = &self.view else {
            return;
        };
        let next = self.snapshot_view(Instant::now());
        view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

async fn broadcast_segment(channel: &dyn RealtimeChannel, segment: &StrokeSegment) {
    let payload = match serde_json::to_value(segment) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "stroke encode failed");
            return;
        }
    };
    if let Err(e) = channel.send(DRAW_EVENT, payload).await {
        warn!(error = %e, "stroke broadcast failed");
    }
}

async fn track(channel: &dyn RealtimeChannel, record: &PresenceRecord) {
    let state = match serde_json::to_value(record) {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "presence encode failed");
            return;
        }
    };
    if let Err(e) = channel.track(state).await {
        warn!(error = %e, "presence announce failed");
    }
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
