//! Two-surface synchronization core for a shared note and a shared sketchpad.
//!
//! Two named participants edit one shared text field and draw on one shared
//! canvas. Text converges by last-writer-wins through a singleton store row;
//! strokes travel as normalized segments over a broadcast channel and are
//! replayed on every peer regardless of its canvas resolution.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`text`] | Text sync engine: debounce, origin-tagged updates, status machine |
//! | [`stroke`] | Stroke broadcast engine: render-then-send, two-step clear, snapshot debounce |
//! | [`presence`] | Presence roster and edge-detected peer pulse |
//! | [`raster`] | Drawing surface trait, software raster, snapshot data-URI codec |
//! | [`history`] | Snapshot persistence behind the [`history::CanvasHistory`] seam |
//! | [`realtime`] | Channel traits, Phoenix websocket client, in-process hub |
//! | [`store`] | Row store trait, PostgREST client, in-memory store |
//! | [`enhance`] | Text enhancement trait, AI action presets, Gemini client |
//! | [`identity`] | Two-name allow-list and the device flag |
//! | [`session`] | Async drivers that wire engines to collaborators |
//! | [`config`] | Environment-driven configuration |

pub mod config;
pub mod enhance;
pub mod history;
pub mod identity;
pub mod presence;
pub mod raster;
pub mod realtime;
pub mod session;
pub mod store;
pub mod stroke;
pub mod text;

pub use frames::ErrorCode;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
