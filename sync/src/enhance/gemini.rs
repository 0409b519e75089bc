//! Gemini `generateContent` client.
//!
//! Thin HTTP wrapper for `/models/{model}:generateContent`. Pure parsing in
//! `parse_response` for testability.

use std::time::Duration;

use async_trait::async_trait;

use super::config::EnhanceConfig;
use super::{EnhanceError, SYSTEM_INSTRUCTION, TextEnhancer, build_prompt};

// =============================================================================
// CLIENT
// =============================================================================

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiClient {
    /// # Errors
    ///
    /// Returns [`EnhanceError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(config: EnhanceConfig) -> Result<Self, EnhanceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| EnhanceError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            api_key: config.api_key,
            model: config.model,
            base_url: config.base_url,
            temperature: config.temperature,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl TextEnhancer for GeminiClient {
    async fn enhance(&self, text: &str, instruction: &str) -> Result<String, EnhanceError> {
        let prompt = build_prompt(instruction, text);
        let body = request_body(&prompt, self.temperature);

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EnhanceError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|e| EnhanceError::ApiRequest(e.to_string()))?;

        if status != 200 {
            return Err(EnhanceError::ApiResponse { status, body: raw });
        }

        let enhanced = parse_response(&raw, text)?;
        tracing::info!(model = %self.model, input_chars = text.len(), output_chars = enhanced.len(), "text enhanced");
        Ok(enhanced)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(serde::Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(serde::Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(serde::Serialize)]
struct GenerationConfig {
    temperature: f32,
}

fn request_body(prompt: &str, temperature: f32) -> ApiRequest<'_> {
    ApiRequest {
        system_instruction: Content { role: None, parts: [Part { text: SYSTEM_INSTRUCTION }] },
        contents: [Content { role: Some("user"), parts: [Part { text: prompt }] }],
        generation_config: GenerationConfig { temperature },
    }
}

#[derive(serde::Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(serde::Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(serde::Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(serde::Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

// =============================================================================
// PARSING
// =============================================================================

/// Concatenate the first candidate's text parts. Empty output falls back to
/// `original` so a blank reply never wipes the note.
fn parse_response(json: &str, original: &str) -> Result<String, EnhanceError> {
    let api: ApiResponse = serde_json::from_str(json).map_err(|e| EnhanceError::ApiParse(e.to_string()))?;

    let text: String = api
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Ok(original.to_owned());
    }
    Ok(text)
}

#[cfg(test)]
#[path = "gemini_test.rs"]
mod tests;
