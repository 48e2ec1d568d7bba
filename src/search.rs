//! Semantic search over the hybrid store
//!
//! Embeds the query text through the configured provider, then runs
//! nearest-neighbor search against the vector index. The expanded variant
//! also walks the legacy chunk adjacency for graph context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Database;
use crate::error::{ChainsawError, ProviderErrorKind, Result};
use crate::llm::EmbeddingProvider;
use crate::types::SearchHit;

/// Search engine configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub embed_model: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            embed_model: "nomic-embed-text".to_string(),
        }
    }
}

/// A search result shaped for CLI output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub snippet: String,
    /// Cosine distance, lower is closer
    pub distance: f64,
    /// 1 - distance, for display
    pub score: f64,
}

impl From<SearchHit> for SearchResult {
    fn from(hit: SearchHit) -> Self {
        Self {
            chunk_id: hit.chunk.chunk_id,
            file_path: hit.file_path,
            start_line: hit.chunk.start_line,
            end_line: hit.chunk.end_line,
            snippet: hit.chunk.content_snippet,
            distance: hit.distance,
            score: 1.0 - hit.distance,
        }
    }
}

/// Query-text to ranked-chunks bridge
pub struct SearchEngine {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            config,
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embeddings = self
            .embedder
            .embed(&self.config.embed_model, &[query.to_string()], 1)
            .await?;
        embeddings.into_iter().next().ok_or_else(|| {
            ChainsawError::provider(ProviderErrorKind::Malformed, "no embedding for query")
        })
    }

    /// Top-k nearest chunks by cosine distance, optionally scoped to a
    /// path prefix (a SQL LIKE pattern such as `/project/%`)
    pub async fn vector_search(
        &self,
        query: &str,
        limit: i64,
        path_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = self.embed_query(query).await?;
        let hits = self.db.search_similar(&embedding, limit, path_filter)?;
        debug!(query, hits = hits.len(), "vector search");
        Ok(hits.into_iter().map(SearchResult::from).collect())
    }

    /// Vector search with graph neighbors attached to each hit
    pub async fn expanded_search(
        &self,
        query: &str,
        limit: i64,
        max_depth: i64,
        path_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.embed_query(query).await?;
        self.db
            .search_with_relations(&embedding, limit, max_depth, path_filter)
    }
}

/// Build the LIKE pattern that scopes results to a directory subtree
pub fn path_prefix_pattern(dir: &str) -> String {
    format!("{}/%", dir.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_prefix_pattern() {
        assert_eq!(path_prefix_pattern("/home/user/p"), "/home/user/p/%");
        assert_eq!(path_prefix_pattern("/home/user/p/"), "/home/user/p/%");
    }

    #[test]
    fn test_search_result_score_is_inverse_distance() {
        let hit = SearchHit {
            chunk: crate::types::Chunk {
                chunk_id: 1,
                file_id: 1,
                content_snippet: "code".into(),
                start_line: 1,
                end_line: 2,
            },
            distance: 0.25,
            file_path: "/p/a.rs".into(),
            related: Vec::new(),
        };
        let result = SearchResult::from(hit);
        assert_eq!(result.score, 0.75);
        assert_eq!(result.start_line, 1);
    }
}
