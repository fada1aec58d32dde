//! Model backend client.
//!
//! [`LanguageModel`] is the narrow seam the rest of the server talks
//! through: one `query(prompt, options, parts) -> text` operation. The
//! production implementation, [`VertexClient`], posts a `generateContent`
//! request to the Vertex AI Gemini REST surface; tests substitute mocks.

use crate::config::Settings;
use crate::types::Part;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling on one model round trip.
const LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-call options passed alongside the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Ask the backend to run its thinking mode. Advisory; the backend may
    /// ignore it.
    pub enable_thinking: bool,
}

/// The single operation the server needs from a model backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a prompt (plus optional multimodal parts) and return the
    /// model's text.
    async fn query(&self, prompt: &str, options: &QueryOptions, parts: &[Part]) -> Result<String>;
}

// ============================================================================
// WIRE SHAPES
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

// ============================================================================
// VERTEX CLIENT
// ============================================================================

/// Vertex AI Gemini client.
pub struct VertexClient {
    http: reqwest::Client,
    project_id: String,
    location: String,
    model: String,
    access_token: String,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    top_k: u32,
}

impl VertexClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http,
            project_id: settings.project_id.clone(),
            location: settings.location.clone(),
            model: settings.model.clone(),
            access_token: settings.access_token.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            top_p: settings.top_p,
            top_k: settings.top_k,
        })
    }

    /// Endpoint for the configured project/location/model. The `global`
    /// location uses the un-prefixed API host.
    fn endpoint(&self) -> String {
        let host = if self.location == "global" {
            "aiplatform.googleapis.com".to_string()
        } else {
            format!("{}-aiplatform.googleapis.com", self.location)
        };
        format!(
            "https://{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            host, self.project_id, self.location, self.model
        )
    }

    fn build_request(&self, prompt: &str, options: &QueryOptions, parts: &[Part]) -> GenerateRequest {
        let mut all_parts = vec![Part::text(prompt)];
        all_parts.extend(parts.iter().cloned());

        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: all_parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                top_p: self.top_p,
                top_k: self.top_k,
                thinking_config: options
                    .enable_thinking
                    .then_some(ThinkingConfig { mode: "THINKING" }),
            },
        }
    }
}

/// Join the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::api("no candidates in model response"))?;

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    let text: String = parts
        .into_iter()
        .filter_map(|part| match part {
            Part::Text { text } => Some(text),
            Part::InlineData { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(Error::api("model response carried no text"));
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for VertexClient {
    async fn query(&self, prompt: &str, options: &QueryOptions, parts: &[Part]) -> Result<String> {
        let request = self.build_request(prompt, options, parts);
        log::debug!(
            "LLM call: model={} thinking={} parts={}",
            self.model,
            options.enable_thinking,
            parts.len()
        );

        let mut builder = self.http.post(self.endpoint()).json(&request);
        if !self.access_token.is_empty() {
            builder = builder.bearer_auth(&self.access_token);
        }

        let response = builder.send().await.map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::api(format!("API error {}: {}", status, body)));
        }

        let parsed: GenerateResponse = response.json().await.map_err(Error::Http)?;
        extract_text(parsed)
    }
}
