//! Bundled mapping recommender
//!
//! Uses the Anthropic messages API to propose column correspondences between
//! two structures. The mapping engine treats it like any other
//! [`Recommender`]: advisory, time-bounded, replaced by rule-based matching
//! on failure.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use autoconv::ai::AiClient;
//! use autoconv::mapping::MappingEngine;
//!
//! let client = AiClient::from_settings(&settings)?;
//! let mapping = MappingEngine::from_settings(&settings)
//!     .recommend(&input, &reference, Some(&client))
//!     .await;
//! ```

pub mod prompt;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::{RecommenderError, RecommenderResult};
use crate::mapping::Recommender;
use crate::models::{MappingCandidate, StructureDescriptor, TransformationKind};

pub use prompt::{system_prompt, user_prompt};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Default number of attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Anthropic API client
#[derive(Clone)]
pub struct AiClient {
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    max_retries: u32,
    http: reqwest::Client,
}

impl std::fmt::Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

/// Anthropic API response structure
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Anthropic API error response
#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Mapping list as returned by the model
#[derive(Debug, Deserialize)]
struct MappingResponse {
    #[serde(default)]
    mappings: Vec<SuggestedMapping>,
}

#[derive(Debug, Deserialize)]
struct SuggestedMapping {
    input_column: String,
    reference_column: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    transformation: String,
}

impl AiClient {
    /// Create a new client with explicit API key
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: model.into(),
            max_tokens: 2048,
            max_retries: DEFAULT_MAX_RETRIES,
            http: reqwest::Client::new(),
        }
    }

    /// Create a client from settings. Without an API key the client reports
    /// itself unavailable and every call fails with `MissingApiKey`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.ai_api_key.clone(),
            model: settings.ai_model.clone(),
            max_tokens: 2048,
            max_retries: DEFAULT_MAX_RETRIES,
            http: reqwest::Client::new(),
        }
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the number of attempts (at least one)
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model for a mapping, retrying failed attempts
    pub async fn suggest_mappings(
        &self,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
    ) -> RecommenderResult<Vec<MappingCandidate>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RecommenderError::MissingApiKey("ANTHROPIC_API_KEY not set".to_string()))?;

        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.try_suggest(api_key, input, reference).await {
                Ok(candidates) => return Ok(candidates),
                Err(e) => {
                    tracing::warn!(attempt, max = self.max_retries, error = %e, "recommendation attempt failed");
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RecommenderError::Api("Unknown error".to_string())))
    }

    /// Single attempt
    async fn try_suggest(
        &self,
        api_key: &str,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
    ) -> RecommenderResult<Vec<MappingCandidate>> {
        let response = self.call_api(api_key, input, reference).await?;
        parse_mappings_from_response(&response)
    }

    /// Call Anthropic API
    async fn call_api(
        &self,
        api_key: &str,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
    ) -> RecommenderResult<String> {
        tracing::debug!(
            model = %self.model,
            input_fields = input.fields().len(),
            reference_fields = reference.fields().len(),
            "calling Anthropic API"
        );

        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "system": prompt::system_prompt(),
            "messages": prompt::build_messages(input, reference)
        });

        let response = self
            .http
            .post(API_URL)
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| RecommenderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RecommenderError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(RecommenderError::Api(error.error.message));
            }
            return Err(RecommenderError::Api(format!("HTTP {}: {}", status, body)));
        }

        let response: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| RecommenderError::InvalidResponse(e.to_string()))?;

        let text = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(RecommenderError::InvalidResponse("Empty response".to_string()));
        }

        tracing::debug!(bytes = text.len(), "received recommendation");
        Ok(text)
    }
}

#[async_trait]
impl Recommender for AiClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn suggest(
        &self,
        input: &StructureDescriptor,
        reference: &StructureDescriptor,
    ) -> RecommenderResult<Vec<MappingCandidate>> {
        self.suggest_mappings(input, reference).await
    }
}

/// Parse mapping candidates from the model's answer
fn parse_mappings_from_response(response: &str) -> RecommenderResult<Vec<MappingCandidate>> {
    let json_str = extract_json(response);

    let parsed: MappingResponse = serde_json::from_str(&json_str).map_err(|e| {
        let preview: String = response.chars().take(500).collect();
        RecommenderError::InvalidResponse(format!("{}. Response was: {}", e, preview))
    })?;

    Ok(parsed
        .mappings
        .into_iter()
        .map(|m| {
            let confidence = m.confidence.round().clamp(0.0, 100.0) as u8;
            let candidate = MappingCandidate::new(
                m.input_column,
                m.reference_column,
                confidence,
                TransformationKind::from_label(&m.transformation),
            );
            if m.reasoning.is_empty() {
                candidate
            } else {
                candidate.with_rationale(m.reasoning)
            }
        })
        .collect())
}

/// Extract JSON from a response that may contain markdown code blocks
fn extract_json(text: &str) -> String {
    if let Some(start) = text.find("```json") {
        let json_start = start + "```json".len();
        if let Some(end) = text[json_start..].find("```") {
            return text[json_start..json_start + end].trim().to_string();
        }
    }

    if let Some(start) = text.find("```") {
        let after_start = start + 3;
        // Skip language identifier if present
        let content_start = text[after_start..]
            .find('\n')
            .map(|i| after_start + i + 1)
            .unwrap_or(after_start);

        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim().to_string();
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if start < end {
                return text[start..=end].to_string();
            }
        }
    }

    text.to_string()
}
