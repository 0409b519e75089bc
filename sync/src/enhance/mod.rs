//! Enhance — AI rewrite of the shared text.
//!
//! DESIGN
//! ======
//! The text engine only needs "text + instruction in, text out", so the
//! provider sits behind [`TextEnhancer`]. Four preset [`AiAction`]s carry the
//! instructions the editor offers. [`gemini::GeminiClient`] is the hosted
//! implementation; tests plug in their own.
//!
//! ERROR HANDLING
//! ==============
//! Failures never touch the buffer. The session surfaces the error to the
//! user as a blocking alert and leaves the text unchanged.

pub mod config;
pub mod gemini;

use async_trait::async_trait;

/// System instruction sent with every request.
pub const SYSTEM_INSTRUCTION: &str =
    "You are a professional writing assistant. Keep the formatting clean. Return ONLY the processed text.";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    /// The required API key environment variable is not set.
    #[error("missing API key: env var {var} not set")]
    MissingApiKey { var: String },

    /// The HTTP request to the provider failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The provider returned a non-success HTTP status.
    #[error("API response error: status {status}")]
    ApiResponse { status: u16, body: String },

    /// The provider response body could not be deserialized.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl frames::ErrorCode for EnhanceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "E_MISSING_API_KEY",
            Self::ApiRequest(_) => "E_API_REQUEST",
            Self::ApiResponse { .. } => "E_API_RESPONSE",
            Self::ApiParse(_) => "E_API_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_) | Self::ApiResponse { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// Preset rewrites offered by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiAction {
    Summarize,
    FixGrammar,
    Expand,
    ActionItems,
}

impl AiAction {
    pub const ALL: [Self; 4] = [Self::Summarize, Self::FixGrammar, Self::Expand, Self::ActionItems];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::FixGrammar => "fix",
            Self::Expand => "expand",
            Self::ActionItems => "action",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Summarize => "Summarize",
            Self::FixGrammar => "Fix Grammar",
            Self::Expand => "Expand",
            Self::ActionItems => "Action Items",
        }
    }

    #[must_use]
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Summarize => "Summarize the following text into clear bullet points.",
            Self::FixGrammar => "Fix any grammar or spelling mistakes while maintaining the original tone.",
            Self::Expand => "Elaborate on these ideas and add professional depth.",
            Self::ActionItems => "Extract actionable tasks from this text.",
        }
    }

    /// Accepts the short id or the kebab-case label.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "summarize" => Some(Self::Summarize),
            "fix" | "fix-grammar" => Some(Self::FixGrammar),
            "expand" => Some(Self::Expand),
            "action" | "action-items" => Some(Self::ActionItems),
            _ => None,
        }
    }
}

/// User content for one request.
#[must_use]
pub fn build_prompt(instruction: &str, text: &str) -> String {
    format!("{instruction}\n\nText to process:\n{text}")
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait]
pub trait TextEnhancer: Send + Sync {
    /// Rewrite `text` according to `instruction`.
    async fn enhance(&self, text: &str, instruction: &str) -> Result<String, EnhanceError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
