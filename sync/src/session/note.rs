//! Note session — drives a [`TextSyncEngine`] against the row store, the
//! row-change feed, and the text enhancer.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::{COMMAND_BUFFER, Collaborators, SessionError};
use crate::config::Timings;
use crate::enhance::{AiAction, EnhanceError, TextEnhancer};
use crate::realtime::{ChannelConfig, ChannelEvent, ConnectionStatus, NOTE_CHANNEL, RealtimeChannel, RowFilter};
use crate::store::{RowStore, SharedTextDocument, StoreError};
use crate::text::{BufferUpdate, SyncStatus, TextSyncEngine};

// =============================================================================
// VIEW
// =============================================================================

/// Snapshot of the note surface for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteView {
    pub text: String,
    pub status: SyncStatus,
    pub connection: ConnectionStatus,
    pub enhancing: bool,
    pub loaded: bool,
    pub last_error: Option<String>,
}

// =============================================================================
// HANDLE
// =============================================================================

enum Command {
    Edit(String),
    Focus(bool),
    Enhance { action: AiAction, reply: oneshot::Sender<Result<(), SessionError>> },
    Reload,
    Flush,
    Shutdown(oneshot::Sender<()>),
}

/// Caller side of a running note session. Dropping it flushes any pending
/// write and ends the session.
pub struct NoteHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<NoteView>,
    task: JoinHandle<()>,
}

impl NoteHandle {
    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    /// Replace the buffer with locally typed text.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn edit(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::Edit(text.into())).await
    }

    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn set_focused(&self, focused: bool) -> Result<(), SessionError> {
        self.send(Command::Focus(focused)).await
    }

    /// Run an AI action over the buffer and wait for it to finish. On success
    /// the result is already in the buffer and scheduled for saving.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EnhanceUnavailable`] without an enhancer,
    /// [`SessionError::EnhanceRejected`] for a blank buffer or a concurrent
    /// run, or the provider's [`SessionError::Enhance`] failure (buffer left
    /// unchanged).
    pub async fn enhance(&self, action: AiAction) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Enhance { action, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Re-read the shared row.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn reload(&self) -> Result<(), SessionError> {
        self.send(Command::Reload).await
    }

    /// Start the pending save now instead of at its deadline.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the session has ended.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.send(Command::Flush).await
    }

    #[must_use]
    pub fn view(&self) -> NoteView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<NoteView> {
        self.view.clone()
    }

    /// Flush, wait for outstanding saves, leave the channel, and stop.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "note session task failed");
        }
    }
}

// =============================================================================
// SPAWN
// =============================================================================

pub struct NoteSession;

impl NoteSession {
    /// Subscribe to the row-change feed, start the initial load, and spawn
    /// the driver.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Channel`] if the subscription fails.
    pub async fn spawn(collaborators: &Collaborators, timings: Timings) -> Result<NoteHandle, SessionError> {
        let layout = collaborators.store.layout().clone();
        let subscription = collaborators
            .realtime
            .subscribe(NOTE_CHANNEL, ChannelConfig::rows(RowFilter::singleton(&layout.text_table)))
            .await?;

        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view) = watch::channel(NoteView::default());

        let mut driver = NoteDriver {
            engine: TextSyncEngine::new(timings.note_debounce),
            store: collaborators.store.clone(),
            enhancer: collaborators.enhancer.clone(),
            channel: subscription.channel,
            table: layout.text_table,
            column: layout.text_column,
            connection: ConnectionStatus::Connecting,
            view: view_tx,
            ops: FuturesUnordered::new(),
            enhance_reply: None,
        };
        driver.load();

        let task = tokio::spawn(driver.run(command_rx, subscription.events));
        info!("note session started");
        Ok(NoteHandle { commands, view, task })
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum NoteOp {
    Loaded(Result<SharedTextDocument, StoreError>),
    Saved { text: String, result: Result<(), StoreError> },
    Enhanced(Result<String, EnhanceError>),
}

struct NoteDriver {
    engine: TextSyncEngine,
    store: Arc<dyn RowStore>,
    enhancer: Option<Arc<dyn TextEnhancer>>,
    channel: Arc<dyn RealtimeChannel>,
    table: String,
    column: String,
    connection: ConnectionStatus,
    view: watch::Sender<NoteView>,
    ops: FuturesUnordered<BoxFuture<'static, NoteOp>>,
    enhance_reply: Option<oneshot::Sender<Result<(), SessionError>>>,
}

impl NoteDriver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        let mut events_open = true;
        let mut shutdown_ack = None;

        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        events_open = false;
                        self.connection = ConnectionStatus::Connecting;
                    }
                },
                Some(op) = self.ops.next(), if !self.ops.is_empty() => self.on_op(op),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }

            if let Some(save) = self.engine.poll(Instant::now()) {
                self.save(save.text);
            }
            self.publish();
        }

        self.drain().await;
        self.channel.leave().await;
        info!("note session stopped");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    /// Flush the pending write and wait for every outstanding call.
    async fn drain(&mut self) {
        loop {
            if let Some(save) = self.engine.flush() {
                debug!(chars = save.text.len(), "flushing pending note write");
                self.save(save.text);
            }
            let Some(op) = self.ops.next().await else {
                break;
            };
            self.on_op(op);
        }
        self.publish();
    }

    fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Edit(text) => {
                self.engine.apply(BufferUpdate::local(text), now);
            }
            Command::Focus(focused) => {
                self.engine.set_focused(focused);
            }
            Command::Enhance { action, reply } => self.begin_enhance(action, reply),
            Command::Reload => self.load(),
            Command::Flush => {
                if let Some(save) = self.engine.flush() {
                    self.save(save.text);
                }
            }
            Command::Shutdown(_) => {}
        }
    }

    fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Subscribed => {
                info!(channel = NOTE_CHANNEL, "note feed subscribed");
                self.connection = ConnectionStatus::Connected;
            }
            ChannelEvent::Rejected(reason) => {
                warn!(channel = NOTE_CHANNEL, %reason, "note feed rejected");
            }
            ChannelEvent::RowChanged { table, record } if table == self.table => {
                // Other columns of the same row (the snapshot) change too.
                match record.get(&self.column) {
                    Some(Value::String(text)) => {
                        let applied = self.engine.apply(BufferUpdate::remote(text.clone()), Instant::now());
                        debug!(?applied, "remote note change");
                    }
                    Some(Value::Null) => {
                        self.engine.apply(BufferUpdate::remote(String::new()), Instant::now());
                    }
                    _ => {}
                }
            }
            ChannelEvent::Closed => {
                warn!(channel = NOTE_CHANNEL, "note feed closed");
                self.connection = ConnectionStatus::Connecting;
            }
            ChannelEvent::RowChanged { .. } | ChannelEvent::Broadcast { .. } | ChannelEvent::PresenceSync(_) => {}
        }
    }

    fn on_op(&mut self, op: NoteOp) {
        match op {
            NoteOp::Loaded(result) => self.engine.on_loaded(result),
            NoteOp::Saved { text, result } => {
                if result.is_ok() {
                    debug!(chars = text.len(), "note saved");
                }
                self.engine.on_save_result(&text, result);
            }
            NoteOp::Enhanced(result) => {
                let outcome = self
                    .engine
                    .on_enhanced(result, Instant::now())
                    .map(|_| ())
                    .map_err(|e| {
                        warn!(error = %e, "enhancement failed");
                        SessionError::from(e)
                    });
                if let Some(reply) = self.enhance_reply.take() {
                    let _ = reply.send(outcome);
                }
            }
        }
    }

    fn begin_enhance(&mut self, action: AiAction, reply: oneshot::Sender<Result<(), SessionError>>) {
        let Some(enhancer) = self.enhancer.clone() else {
            let _ = reply.send(Err(SessionError::EnhanceUnavailable));
            return;
        };
        let request = match self.engine.begin_enhance(action) {
            Ok(request) => request,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        info!(action = action.id(), chars = request.text.len(), "enhancing note");
        self.enhance_reply = Some(reply);
        self.ops.push(Box::pin(async move {
            NoteOp::Enhanced(enhancer.enhance(&request.text, request.instruction).await)
        }));
    }

    fn load(&mut self) {
        let store = self.store.clone();
        self.ops.push(Box::pin(async move { NoteOp::Loaded(store.fetch_text().await) }));
    }

    fn save(&mut self, text: String) {
        let store = self.store.clone();
        self.ops.push(Box::pin(async move {
            let result = store.update_text(&text).await;
            NoteOp::Saved { text, result }
        }));
    }

    fn publish(&self) {
        let next = NoteView {
            text: self.engine.buffer().to_owned(),
            status: self.engine.status(),
            connection: self.connection,
            enhancing: self.engine.is_enhancing(),
            loaded: self.engine.is_loaded(),
            last_error: self.engine.last_error().map(str::to_owned),
        };
        self.view.send_if_modified(|view| {
            if *view == next {
                return false;
            }
            *view = next;
            true
        });
    }
}

#[cfg(test)]
#[path = "note_test.rs"]
mod tests;
