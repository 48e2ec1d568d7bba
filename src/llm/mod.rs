//! External provider capabilities
//!
//! Two capabilities bridge to HTTP providers: embedding generation and
//! knowledge-graph edge extraction. A provider value pairs the capability
//! it implements with a model name and timeouts; the pipeline only ever
//! sees the traits.

pub mod batch;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A relationship extracted from code by the LLM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEdge {
    pub source: String,
    pub source_type: String,
    pub target: String,
    pub target_type: String,
    pub relation_type: String,
}

/// A code chunk handed to the batch extractor
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub chunk_id: i64,
    pub file_id: i64,
    pub file_path: String,
    pub content: String,
}

/// An extracted edge tagged with the chunk and file it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeWithMeta {
    pub edge: ExtractedEdge,
    pub chunk_id: i64,
    pub file_id: i64,
}

/// Generates vector embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order. `parallelism` bounds the
    /// number of in-flight provider requests.
    async fn embed(
        &self,
        model: &str,
        texts: &[String],
        parallelism: usize,
    ) -> Result<Vec<Vec<f32>>>;
}

/// Extracts knowledge-graph edges from code
#[async_trait]
pub trait GraphExtractor: Send + Sync {
    /// Zero or more edges from a single snippet
    async fn extract_edges(&self, model: &str, code: &str) -> Result<Vec<ExtractedEdge>>;

    /// The primary operation: analyze multiple chunks in one call and
    /// return edges tagged with their originating chunk and file ids
    async fn extract_edges_batch(
        &self,
        model: &str,
        chunks: &[ChunkInput],
    ) -> Result<Vec<EdgeWithMeta>>;
}
