//! Enhancement configuration parsed from environment variables.

use super::EnhanceError;
use crate::config::env_parse;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_API_KEY_ENV: &str = "API_KEY";
pub const DEFAULT_ENHANCE_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_ENHANCE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhanceTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnhanceConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeouts: EnhanceTimeouts,
}

impl EnhanceConfig {
    /// Build typed enhancement config from environment variables.
    ///
    /// Required:
    /// - the variable named by `ENHANCE_API_KEY_ENV` (default `API_KEY`)
    ///
    /// Optional:
    /// - `ENHANCE_MODEL`: default `gemini-3-flash-preview`
    /// - `ENHANCE_BASE_URL`: default Gemini v1beta endpoint
    /// - `ENHANCE_TEMPERATURE`: default 0.7
    /// - `ENHANCE_REQUEST_TIMEOUT_SECS`: default 60
    /// - `ENHANCE_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::MissingApiKey`] when the key variable is unset or empty.
    pub fn from_env() -> Result<Self, EnhanceError> {
        let key_var = std::env::var("ENHANCE_API_KEY_ENV").unwrap_or_else(|_| DEFAULT_API_KEY_ENV.to_string());
        let api_key = std::env::var(&key_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| EnhanceError::MissingApiKey { var: key_var.clone() })?;

        let model = std::env::var("ENHANCE_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());
        let base_url = std::env::var("ENHANCE_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let temperature = env_parse("ENHANCE_TEMPERATURE", DEFAULT_TEMPERATURE);
        let timeouts = EnhanceTimeouts {
            request_secs: env_parse("ENHANCE_REQUEST_TIMEOUT_SECS", DEFAULT_ENHANCE_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("ENHANCE_CONNECT_TIMEOUT_SECS", DEFAULT_ENHANCE_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self { api_key, model, base_url, temperature, timeouts })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
