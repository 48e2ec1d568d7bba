//! Local embedded-LLM HTTP adapter
//!
//! Talks to an Ollama-style API: `/api/embeddings` for vectors and
//! `/api/generate` for extraction prompts. When the base URL points at an
//! OpenAI-style router the generate path falls back to the
//! chat-completions format.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChainsawError, ProviderErrorKind, Result};

use super::batch::{build_markdown_prompt, parse_jsonl, strip_markdown_code_fence};
use super::{ChunkInput, EdgeWithMeta, EmbeddingProvider, ExtractedEdge, GraphExtractor};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_PARALLELISM: usize = 5;

/// Configuration for the local provider
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Optional bearer token, for API-key-based routers
    pub api_key: Option<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
            api_key: None,
        }
    }
}

/// Client for the local embedded-LLM HTTP API
pub struct OllamaClient {
    base_url: String,
    client: Client,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let base_url = if config.base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChainsawError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url,
            client,
            api_key: config.api_key,
        })
    }

    /// Connectivity check against the API root
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(ChainsawError::provider(
                ProviderErrorKind::Status,
                format!("status {}", response.status().as_u16()),
            ));
        }
        Ok(())
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(ChainsawError::provider(
                ProviderErrorKind::Status,
                format!(
                    "status {}: {}",
                    status.as_u16(),
                    body_preview(&bytes)
                ),
            ));
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            ChainsawError::provider(
                ProviderErrorKind::Malformed,
                format!("decode response: {}. Body preview: {}", e, body_preview(&bytes)),
            )
        })
    }

    /// Produce a text completion
    pub async fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String> {
        let response: GenerateResponse = self
            .post_json(
                "/api/generate",
                &GenerateRequest {
                    model,
                    prompt,
                    system: (!system.is_empty()).then_some(system),
                    stream: false,
                    format: None,
                },
            )
            .await?;
        Ok(response.response)
    }

    /// Produce structured output. Routers that speak the chat-completions
    /// dialect are detected from the base URL; the native API only
    /// supports the plain "json" format hint.
    async fn generate_with_format(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        json_format: bool,
    ) -> Result<String> {
        if self.base_url.contains("openrouter") {
            return self.generate_chat(model, prompt, system).await;
        }

        let response: GenerateResponse = self
            .post_json(
                "/api/generate",
                &GenerateRequest {
                    model,
                    prompt,
                    system: (!system.is_empty()).then_some(system),
                    stream: false,
                    format: json_format.then_some("json"),
                },
            )
            .await?;
        Ok(response.response)
    }

    async fn generate_chat(&self, model: &str, prompt: &str, system: &str) -> Result<String> {
        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let response: ChatResponse = self
            .post_json(
                "/v1/chat/completions",
                &ChatRequest {
                    model,
                    messages,
                    temperature: 0.1,
                },
            )
            .await?;

        response
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
impl EmbeddingProvider for OllamaClient {
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        parallelism: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let parallelism = if parallelism == 0 {
            DEFAULT_PARALLELISM
        } else {
            parallelism
        };

        debug!(count = texts.len(), parallelism, "embedding texts");

        // buffered preserves input order in the output
        let futures: Vec<_> = texts.iter().map(|text| self.embed_one(model, text)).collect();
        stream::iter(futures).buffered(parallelism).try_collect().await
    }
}

impl OllamaClient {
    async fn embed_one(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let response: EmbeddingResponse = self
            .post_json(
                "/api/embeddings",
                &EmbeddingRequest {
                    model,
                    prompt: text,
                },
            )
            .await?;
        Ok(response.embedding)
    }
}

#[async_trait]
impl GraphExtractor for OllamaClient {
    async fn extract_edges(&self, model: &str, code: &str) -> Result<Vec<ExtractedEdge>> {
        let prompt = single_chunk_prompt(code);
        let response = self
            .generate_with_format(
                model,
                &prompt,
                "You are a code relation extractor. Return only valid JSON.",
                true,
            )
            .await?;

        let body = strip_markdown_code_fence(&response);
        serde_json::from_str(body).map_err(|e| {
            ChainsawError::provider(
                ProviderErrorKind::Malformed,
                format!("parse edges from response: {}", e),
            )
        })
    }

    async fn extract_edges_batch(
        &self,
        model: &str,
        chunks: &[ChunkInput],
    ) -> Result<Vec<EdgeWithMeta>> {
        let (prompt, mapping) = build_markdown_prompt(chunks);
        let response = self
            .generate_with_format(
                model,
                &prompt,
                "You are a code relation extractor. Return only JSONL format (one JSON object per line).",
                false,
            )
            .await?;
        parse_jsonl(&response, &mapping)
    }
}

/// Prompt used by the single-snippet extraction operation
pub(super) fn single_chunk_prompt(code: &str) -> String {
    format!(
        "Extract code relations. Entity types: FUNCTION, METHOD, TYPE, INTERFACE, STRUCT, VARIABLE, CONSTANT, PACKAGE, TEST. \
         Relations: calls, uses, imports, implements, extends, defines, references, creates, returns, accepts, has_field, tests.\n\
         \n\
         Example:\n\
         fn new_client(cfg: &Config) -> Client {{ Client {{ config: cfg.clone() }} }}\n\
         \n\
         Output:\n\
         [\n\
           {{\"source\": \"new_client\", \"source_type\": \"FUNCTION\", \"target\": \"Config\", \"target_type\": \"TYPE\", \"relation_type\": \"uses\"}},\n\
           {{\"source\": \"new_client\", \"source_type\": \"FUNCTION\", \"target\": \"Client\", \"target_type\": \"TYPE\", \"relation_type\": \"creates\"}}\n\
         ]\n\
         \n\
         Code:\n\
         {code}"
    )
}

pub(super) fn map_reqwest_error(err: reqwest::Error) -> ChainsawError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else if err.is_connect() {
        ProviderErrorKind::Connection
    } else {
        ProviderErrorKind::Connection
    };
    ChainsawError::provider(kind, err.to_string())
}

pub(super) fn body_preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.chars().count() > 200 {
        let cut: String = text.chars().take(200).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
