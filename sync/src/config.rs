//! Application configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Everything is read once at startup. Required values (`SUPABASE_URL`,
//! `SUPABASE_ANON_KEY`) fail fast; tunables fall back to their defaults when
//! absent or unparseable. Enhancement config lives in
//! [`crate::enhance::config`] and is optional.

use std::str::FromStr;
use std::time::Duration;

use crate::identity::{AllowList, IdentityError};
use crate::raster::DEFAULT_JPEG_QUALITY;
use crate::realtime::phoenix::{RealtimeConfig, realtime_endpoint};
use crate::store::{StoreConfig, TableLayout};

pub const DEFAULT_NOTE_DEBOUNCE_MS: u64 = 1000;
pub const DEFAULT_SNAPSHOT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_CLEAR_CONFIRM_MS: u64 = 3000;
pub const DEFAULT_PRESENCE_PULSE_MS: u64 = 5000;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 25;
pub const DEFAULT_STORE_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STORE_CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(String),
    #[error("invalid {var}: {reason}")]
    Invalid { var: String, reason: String },
    #[error("invalid allow-list: {0}")]
    AllowList(#[from] IdentityError),
}

impl frames::ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_CONFIG_MISSING",
            Self::Invalid { .. } => "E_CONFIG_PARSE",
            Self::AllowList(_) => "E_CONFIG_ALLOW_LIST",
        }
    }
}

// =============================================================================
// TIMINGS
// =============================================================================

/// Debounce windows and intervals shared by the engines and drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub note_debounce: Duration,
    pub snapshot_debounce: Duration,
    pub clear_confirm: Duration,
    pub presence_pulse: Duration,
    pub heartbeat: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            note_debounce: Duration::from_millis(DEFAULT_NOTE_DEBOUNCE_MS),
            snapshot_debounce: Duration::from_millis(DEFAULT_SNAPSHOT_DEBOUNCE_MS),
            clear_confirm: Duration::from_millis(DEFAULT_CLEAR_CONFIRM_MS),
            presence_pulse: Duration::from_millis(DEFAULT_PRESENCE_PULSE_MS),
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }
}

impl Timings {
    /// Read every timing knob, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            note_debounce: Duration::from_millis(env_parse("NOTE_DEBOUNCE_MS", DEFAULT_NOTE_DEBOUNCE_MS)),
            snapshot_debounce: Duration::from_millis(env_parse("SNAPSHOT_DEBOUNCE_MS", DEFAULT_SNAPSHOT_DEBOUNCE_MS)),
            clear_confirm: Duration::from_millis(env_parse("CLEAR_CONFIRM_MS", DEFAULT_CLEAR_CONFIRM_MS)),
            presence_pulse: Duration::from_millis(env_parse("PRESENCE_PULSE_MS", DEFAULT_PRESENCE_PULSE_MS)),
            heartbeat: Duration::from_secs(env_parse("REALTIME_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS)),
        }
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub realtime: RealtimeConfig,
    pub timings: Timings,
    pub allowed: AllowList,
    pub snapshot_quality: u8,
}

impl AppConfig {
    /// Build the full configuration from environment variables.
    ///
    /// Required:
    /// - `SUPABASE_URL`: project base URL, e.g. `https://xyz.supabase.co`
    /// - `SUPABASE_ANON_KEY`: public API key used for REST and realtime
    ///
    /// Optional:
    /// - `GHOST_TEXT_TABLE` / `GHOST_TEXT_COLUMN`: default `shared_content` / `text_note`
    /// - `GHOST_SNAPSHOT_TABLE` / `GHOST_SNAPSHOT_COLUMN`: default `shared_content` / `image_data`
    /// - `GHOST_ALLOWED_USERS`: comma-separated pair, default `Atif,Adiba`
    /// - `SNAPSHOT_JPEG_QUALITY`: 1..=100, default 70
    /// - timing knobs, see [`Timings::from_env`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing, the URL is
    /// not http(s), or the allow-list is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = required("SUPABASE_URL")?.trim_end_matches('/').to_string();
        let api_key = required("SUPABASE_ANON_KEY")?;

        let defaults = TableLayout::default();
        let layout = TableLayout {
            text_table: env_string("GHOST_TEXT_TABLE", &defaults.text_table),
            text_column: env_string("GHOST_TEXT_COLUMN", &defaults.text_column),
            snapshot_table: env_string("GHOST_SNAPSHOT_TABLE", &defaults.snapshot_table),
            snapshot_column: env_string("GHOST_SNAPSHOT_COLUMN", &defaults.snapshot_column),
        };

        let timings = Timings::from_env();
        let endpoint = realtime_endpoint(&base_url)
            .map_err(|reason| ConfigError::Invalid { var: "SUPABASE_URL".into(), reason: reason.to_string() })?;
        let realtime = RealtimeConfig { endpoint, api_key: api_key.clone(), heartbeat: timings.heartbeat };

        let store = StoreConfig {
            base_url,
            api_key,
            layout,
            request_timeout: Duration::from_secs(env_parse(
                "STORE_REQUEST_TIMEOUT_SECS",
                DEFAULT_STORE_REQUEST_TIMEOUT_SECS,
            )),
            connect_timeout: Duration::from_secs(env_parse(
                "STORE_CONNECT_TIMEOUT_SECS",
                DEFAULT_STORE_CONNECT_TIMEOUT_SECS,
            )),
        };

        let allowed = match std::env::var("GHOST_ALLOWED_USERS") {
            Ok(raw) => AllowList::parse(&raw)?,
            Err(_) => AllowList::default(),
        };

        let snapshot_quality = env_parse("SNAPSHOT_JPEG_QUALITY", DEFAULT_JPEG_QUALITY).clamp(1, 100);

        Ok(Self { store, realtime, timings, allowed, snapshot_quality })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

pub(crate) fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
