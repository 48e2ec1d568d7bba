//! OpenAI-compatible chat-completions adapter
//!
//! Used for graph extraction against hosted routers (OpenRouter, Azure,
//! and the like): bearer auth, configurable base URL, and the same JSONL
//! batch protocol as the local adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChainsawError, ProviderErrorKind, Result};

use super::batch::{build_markdown_prompt, parse_jsonl, strip_markdown_code_fence};
use super::ollama::{body_preview, map_reqwest_error, single_chunk_prompt};
use super::{ChunkInput, EdgeWithMeta, ExtractedEdge, GraphExtractor};

/// Configuration for the OpenAI-compatible adapter
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base URL, e.g. "https://openrouter.ai/v1"
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Client for OpenAI-compatible chat-completions APIs
#[derive(Debug)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(ChainsawError::Config(
                "OpenAI-compatible provider requires a base URL".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChainsawError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            client,
        })
    }

    async fn chat(&self, model: &str, system: &str, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.1,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(ChainsawError::provider(
                ProviderErrorKind::Status,
                format!("status {}: {}", status.as_u16(), body_preview(&bytes)),
            ));
        }

        let parsed: CompletionResponse = serde_json::from_slice(&bytes).map_err(|e| {
            ChainsawError::provider(
                ProviderErrorKind::Malformed,
                format!(
                    "decode response (status {}): {}. Body preview: {}",
                    status.as_u16(),
                    e,
                    body_preview(&bytes)
                ),
            )
        })?;

        if let Some(error) = parsed.error {
            if !error.message.is_empty() {
                return Err(ChainsawError::provider(
                    ProviderErrorKind::Status,
                    format!("API error: {} ({})", error.message, error.kind),
                ));
            }
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ChainsawError::provider(ProviderErrorKind::Malformed, "no response from API")
            })
    }
}

#[async_trait]
impl GraphExtractor for OpenAiClient {
    async fn extract_edges(&self, model: &str, code: &str) -> Result<Vec<ExtractedEdge>> {
        let prompt = format!(
            "{}\n\nReturn ONLY a valid JSON array of edges, no other text.",
            single_chunk_prompt(code)
        );
        let content = self
            .chat(
                model,
                "You are a code relation extractor. Return only valid JSON arrays.",
                &prompt,
            )
            .await?;

        let body = strip_markdown_code_fence(&content);
        serde_json::from_str(body).map_err(|e| {
            ChainsawError::provider(
                ProviderErrorKind::Malformed,
                format!("parse edges from response: {} (content: {})", e, body),
            )
        })
    }

    async fn extract_edges_batch(
        &self,
        model: &str,
        chunks: &[ChunkInput],
    ) -> Result<Vec<EdgeWithMeta>> {
        let (prompt, mapping) = build_markdown_prompt(chunks);
        let content = self
            .chat(
                model,
                "You are a code relation extractor. Return only JSONL format (one JSON object per line).",
                &prompt,
            )
            .await?;
        parse_jsonl(&content, &mapping)
    }
}
