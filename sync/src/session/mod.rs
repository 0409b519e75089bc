//! Session drivers — the async loops that connect engines to collaborators.
//!
//! DESIGN
//! ======
//! Each surface runs as one spawned task owning its engine. The task
//! `select!`s over four sources: commands from the handle, channel events,
//! completions of in-flight store/AI calls, and the engine's next deadline.
//! After every wake-up it polls the engine for due work and publishes a fresh
//! view on a `watch` channel. Engines never see IO; drivers never make
//! decisions.
//!
//! All external services arrive through one [`Collaborators`] value built at
//! startup and shared by both drivers.
//!
//! LIFECYCLE
//! =========
//! 1. `spawn` subscribes to the surface's channel and starts the task
//! 2. Handle methods enqueue commands; views stream out via `watch`
//! 3. `shutdown()` (or dropping the handle) flushes pending writes, waits for
//!    in-flight saves, and leaves the channel

pub mod canvas;
pub mod note;

use std::sync::Arc;

use frames::ErrorCode;

use crate::config::AppConfig;
use crate::enhance::config::EnhanceConfig;
use crate::enhance::gemini::GeminiClient;
use crate::enhance::{EnhanceError, TextEnhancer};
use crate::history::{CanvasHistory, SnapshotHistory};
use crate::realtime::phoenix::PhoenixClient;
use crate::realtime::{ChannelError, Realtime};
use crate::store::postgrest::PostgrestStore;
use crate::store::{RowStore, StoreError};
use crate::stroke::StrokeError;
use crate::text::EnhanceRejected;

/// Command queue depth per session.
pub const COMMAND_BUFFER: usize = 64;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Enhance(#[from] EnhanceError),

    #[error("text enhancement is not configured")]
    EnhanceUnavailable,

    #[error(transparent)]
    EnhanceRejected(#[from] EnhanceRejected),

    #[error(transparent)]
    Stroke(#[from] StrokeError),

    #[error("session has shut down")]
    Closed,
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Channel(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Enhance(e) => e.error_code(),
            Self::EnhanceUnavailable => "E_ENHANCE_UNAVAILABLE",
            Self::EnhanceRejected(EnhanceRejected::EmptyBuffer) => "E_ENHANCE_EMPTY",
            Self::EnhanceRejected(EnhanceRejected::InFlight) => "E_ENHANCE_BUSY",
            Self::Stroke(e) => e.error_code(),
            Self::Closed => "E_SESSION_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Channel(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
            Self::Enhance(e) => e.retryable(),
            Self::EnhanceRejected(EnhanceRejected::InFlight) => true,
            _ => false,
        }
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// The external services a session talks to, constructed once and passed to
/// both drivers.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RowStore>,
    pub realtime: Arc<dyn Realtime>,
    pub enhancer: Option<Arc<dyn TextEnhancer>>,
    pub history: Arc<dyn CanvasHistory>,
}

impl Collaborators {
    /// Canvas history defaults to the snapshot row of `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RowStore>, realtime: Arc<dyn Realtime>) -> Self {
        let history: Arc<dyn CanvasHistory> = Arc::new(SnapshotHistory::new(store.clone()));
        Self { store, realtime, enhancer: None, history }
    }

    #[must_use]
    pub fn with_enhancer(mut self, enhancer: Arc<dyn TextEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn CanvasHistory>) -> Self {
        self.history = history;
        self
    }

    /// Build the hosted collaborators: PostgREST store, Phoenix realtime
    /// socket, and (when configured) the Gemini enhancer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if an HTTP client cannot be built or the
    /// realtime socket cannot connect.
    pub async fn connect(config: &AppConfig, enhance: Option<EnhanceConfig>) -> Result<Self, SessionError> {
        let store: Arc<dyn RowStore> = Arc::new(PostgrestStore::new(config.store.clone())?);
        let realtime: Arc<dyn Realtime> = Arc::new(PhoenixClient::connect(config.realtime.clone()).await?);
        let mut collaborators = Self::new(store, realtime);
        if let Some(enhance) = enhance {
            collaborators = collaborators.with_enhancer(Arc::new(GeminiClient::new(enhance)?));
        }
        Ok(collaborators)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
