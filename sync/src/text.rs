//! Text sync engine — one shared text buffer, last writer wins.
//!
//! DESIGN
//! ======
//! The engine is a plain state machine. It never performs IO and never reads
//! the clock: the session driver feeds it [`BufferUpdate`]s, store results,
//! and `now`, and carries out the [`SaveRequest`]s it hands back.
//!
//! Every change to the buffer carries an [`Origin`]. Only `Local` changes
//! schedule a save, so a remote update can never bounce back to the store.
//! Local edits are debounced: each keystroke pushes the deadline out by the
//! debounce window and replaces the pending text, so a burst of typing
//! produces exactly one write with the final text. At most one save is in
//! flight; a deadline that passes while a save is outstanding fires as soon
//! as that save completes.
//!
//! Remote text is dropped when it equals the buffer (no transition), when it
//! is the echo of any write this client sent that the feed has not reported
//! yet, or when it equals the last synced text (another column of the same
//! row changed). While the input has focus, foreign remote text is held back
//! and applied on blur unless the user has typed since.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::enhance::{AiAction, EnhanceError};
use crate::store::{SharedTextDocument, StoreError};

/// Sent writes whose echo has not been seen are forgotten past this count.
const MAX_UNECHOED: usize = 16;

// =============================================================================
// TYPES
// =============================================================================

/// Save status shown next to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Buffer matches what was last read from or written to the store.
    #[default]
    Synced,
    /// Local edits are waiting for the debounce window to close.
    LocalEdit,
    /// A save is in flight.
    Syncing,
    /// The last load or save failed.
    Error,
}

impl SyncStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::LocalEdit => "local-edit",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

/// Who produced a buffer change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Typed here, or an enhancement result accepted here.
    Local,
    /// Arrived from the store's change feed.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferUpdate {
    pub text: String,
    pub origin: Origin,
}

impl BufferUpdate {
    pub fn local(text: impl Into<String>) -> Self {
        Self { text: text.into(), origin: Origin::Local }
    }

    pub fn remote(text: impl Into<String>) -> Self {
        Self { text: text.into(), origin: Origin::Remote }
    }
}

/// What an update did to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Local edit buffered; the save deadline moved.
    SaveScheduled,
    /// Local edit returned the buffer to the stored text; nothing to save.
    Reverted,
    /// Remote text replaced the buffer and cancelled any pending save.
    Replaced,
    /// Remote text equals the buffer.
    Identical,
    /// Remote text is the echo of this client's own write.
    Echo,
    /// Remote text equals the last synced text; the row changed elsewhere.
    Unchanged,
    /// Remote text held back while the input has focus.
    Deferred,
}

/// A write the driver must perform, then report via
/// [`TextSyncEngine::on_save_result`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub text: String,
}

/// An enhancement the driver must perform, then report via
/// [`TextSyncEngine::on_enhanced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceRequest {
    pub action: AiAction,
    pub text: String,
    pub instruction: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnhanceRejected {
    #[error("nothing to enhance")]
    EmptyBuffer,
    #[error("an enhancement is already running")]
    InFlight,
}

#[derive(Debug)]
struct PendingWrite {
    text: String,
    due: Instant,
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug)]
pub struct TextSyncEngine {
    buffer: String,
    last_synced: String,
    status: SyncStatus,
    debounce: Duration,
    pending: Option<PendingWrite>,
    in_flight: Option<String>,
    /// Texts sent to the store, oldest first, whose echo has not arrived.
    unechoed: VecDeque<String>,
    deferred_remote: Option<String>,
    focused: bool,
    enhancing: bool,
    loaded: bool,
    last_error: Option<String>,
}

impl TextSyncEngine {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            buffer: String::new(),
            last_synced: String::new(),
            status: SyncStatus::Synced,
            debounce,
            pending: None,
            in_flight: None,
            unechoed: VecDeque::new(),
            deferred_remote: None,
            focused: false,
            enhancing: false,
            loaded: false,
            last_error: None,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    #[must_use]
    pub fn last_synced(&self) -> &str {
        &self.last_synced
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.focused
    }

    #[must_use]
    pub fn is_enhancing(&self) -> bool {
        self.enhancing
    }

    /// When [`Self::poll`] next has a save to hand out. `None` while a save is
    /// in flight; the driver re-polls when it completes.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight.is_some() {
            return None;
        }
        self.pending.as_ref().map(|p| p.due)
    }

    // -------------------------------------------------------------------------
    // Load
    // -------------------------------------------------------------------------

    /// Apply the initial (or a repeated) read of the shared row.
    pub fn on_loaded(&mut self, result: Result<SharedTextDocument, StoreError>) {
        match result {
            Ok(doc) => {
                debug!(chars = doc.text.len(), "shared text loaded");
                self.buffer.clone_from(&doc.text);
                self.last_synced = doc.text;
                self.pending = None;
                self.deferred_remote = None;
                self.unechoed.clear();
                self.status = SyncStatus::Synced;
                self.last_error = None;
                self.loaded = true;
            }
            Err(e) => {
                warn!(error = %e, "shared text load failed");
                self.status = SyncStatus::Error;
                self.last_error = Some(e.to_string());
            }
        }
    }

    // -------------------------------------------------------------------------
    // Buffer updates
    // -------------------------------------------------------------------------

    /// Apply a buffer change from either origin.
    pub fn apply(&mut self, update: BufferUpdate, now: Instant) -> Applied {
        match update.origin {
            Origin::Local => self.apply_local(update.text, now),
            Origin::Remote => self.apply_remote(update.text),
        }
    }

    fn apply_local(&mut self, text: String, now: Instant) -> Applied {
        self.buffer = text;
        self.deferred_remote = None;

        if self.buffer == self.last_synced && self.in_flight.is_none() {
            self.pending = None;
            self.status = SyncStatus::Synced;
            self.last_error = None;
            return Applied::Reverted;
        }

        self.pending = Some(PendingWrite { text: self.buffer.clone(), due: now + self.debounce });
        self.status = SyncStatus::LocalEdit;
        self.last_error = None;
        Applied::SaveScheduled
    }

    fn apply_remote(&mut self, text: String) -> Applied {
        if let Some(pos) = self.unechoed.iter().position(|sent| *sent == text) {
            debug!(chars = text.len(), "ignoring echo of own write");
            // The feed reports writes in store order, so older sends are done.
            self.unechoed.drain(..=pos);
            if self.unechoed.is_empty() {
                self.last_synced = text;
            }
            return Applied::Echo;
        }
        if text == self.buffer {
            return Applied::Identical;
        }
        if text == self.last_synced {
            return Applied::Unchanged;
        }
        if self.focused {
            self.deferred_remote = Some(text);
            return Applied::Deferred;
        }
        self.replace_with_remote(text);
        Applied::Replaced
    }

    fn replace_with_remote(&mut self, text: String) {
        debug!(chars = text.len(), "remote text applied");
        self.buffer.clone_from(&text);
        self.last_synced = text;
        self.pending = None;
        // A save still in flight lands after this text; its echo must then be
        // applied, not ignored, so the buffer follows the store.
        self.in_flight = None;
        self.unechoed.clear();
        self.deferred_remote = None;
        self.status = SyncStatus::Synced;
        self.last_error = None;
    }

    // -------------------------------------------------------------------------
    // Focus
    // -------------------------------------------------------------------------

    /// Track input focus. Losing focus applies held-back remote text when no
    /// local edit is pending.
    pub fn set_focused(&mut self, focused: bool) -> Option<Applied> {
        self.focused = focused;
        if focused {
            return None;
        }
        let text = self.deferred_remote.take()?;
        if self.pending.is_some() || text == self.buffer || text == self.last_synced {
            return None;
        }
        self.replace_with_remote(text);
        Some(Applied::Replaced)
    }

    // -------------------------------------------------------------------------
    // Saves
    // -------------------------------------------------------------------------

    /// Hand out the pending save once its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<SaveRequest> {
        let due = self.next_deadline()?;
        if now < due {
            return None;
        }
        self.flush()
    }

    /// Hand out the pending save immediately, ignoring the deadline.
    pub fn flush(&mut self) -> Option<SaveRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        let pending = self.pending.take()?;
        self.in_flight = Some(pending.text.clone());
        if self.unechoed.len() == MAX_UNECHOED {
            self.unechoed.pop_front();
        }
        self.unechoed.push_back(pending.text.clone());
        self.status = SyncStatus::Syncing;
        Some(SaveRequest { text: pending.text })
    }

    /// Report the outcome of a [`SaveRequest`].
    pub fn on_save_result(&mut self, text: &str, result: Result<(), StoreError>) {
        if self.in_flight.as_deref() != Some(text) {
            debug!("save result superseded by remote text");
            return;
        }
        self.in_flight = None;

        match result {
            Ok(()) => {
                self.last_synced = text.to_owned();
                self.last_error = None;
                self.status = if self.pending.is_some() {
                    SyncStatus::LocalEdit
                } else {
                    SyncStatus::Synced
                };
            }
            Err(e) => {
                warn!(error = %e, "shared text save failed");
                self.last_error = Some(e.to_string());
                // The store never took this text; a matching remote is foreign.
                if let Some(pos) = self.unechoed.iter().rposition(|sent| sent == text) {
                    self.unechoed.remove(pos);
                }
                // No retry. A pending edit still fires on its own deadline;
                // otherwise the next local edit schedules a fresh save.
                self.status = SyncStatus::Error;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Enhancement
    // -------------------------------------------------------------------------

    /// Start an enhancement of the current buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceRejected`] when the buffer is blank or another
    /// enhancement is still running.
    pub fn begin_enhance(&mut self, action: AiAction) -> Result<EnhanceRequest, EnhanceRejected> {
        if self.enhancing {
            return Err(EnhanceRejected::InFlight);
        }
        if self.buffer.trim().is_empty() {
            return Err(EnhanceRejected::EmptyBuffer);
        }
        self.enhancing = true;
        Ok(EnhanceRequest { action, text: self.buffer.clone(), instruction: action.instruction() })
    }

    /// Accept an enhancement result as a local edit. On failure the buffer is
    /// left alone and the error is handed back for the user.
    ///
    /// # Errors
    ///
    /// Returns the provider's [`EnhanceError`] unchanged.
    pub fn on_enhanced(&mut self, result: Result<String, EnhanceError>, now: Instant) -> Result<Applied, EnhanceError> {
        self.enhancing = false;
        let text = result?;
        Ok(self.apply(BufferUpdate::local(text), now))
    }
}

#[cfg(test)]
#[path = "text_test.rs"]
mod tests;
