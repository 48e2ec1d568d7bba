//! Graph-extraction worker
//!
//! Drains the chunk watermark: fetches chunks that have not been through
//! graph extraction, sends them to the extraction provider in sub-batches,
//! and upserts the returned entities and edges. The batch is marked
//! extracted only after every sub-batch succeeds, so a provider failure
//! leaves the watermark untouched and the chunks are retried; inserted
//! edges are absorbed by the edge primary key on the second pass.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{ChainsawError, Result};
use crate::llm::ChunkInput;

use super::Indexer;

/// Graph worker configuration
#[derive(Debug, Clone)]
pub struct GraphWorkerConfig {
    pub poll_interval: Duration,
    /// Chunk ids fetched per tick
    pub batch_size: i64,
}

impl Default for GraphWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 150,
        }
    }
}

/// Turns unextracted chunks into entity/edge rows
pub struct GraphWorker {
    indexer: Arc<Indexer>,
    config: GraphWorkerConfig,
}

impl GraphWorker {
    pub fn new(indexer: Arc<Indexer>, config: GraphWorkerConfig) -> Self {
        Self { indexer, config }
    }

    /// Worker loop, cancellation-aware like the embedding worker
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "graph worker started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("graph worker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.process_chunks(&cancel).await;
                }
            }
        }
    }

    /// One tick: fetch unextracted chunk ids, run the batch, advance the
    /// watermark only on full success
    pub async fn process_chunks(&self, cancel: &CancellationToken) {
        let chunk_ids = match self
            .indexer
            .db
            .chunks_needing_extraction(self.config.batch_size)
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to fetch chunks needing extraction");
                return;
            }
        };

        if chunk_ids.is_empty() {
            return;
        }
        info!(chunk_count = chunk_ids.len(), "processing graph extraction batch");

        let edge_count = match self.process_graph_batch(&chunk_ids, cancel).await {
            Ok(count) => count,
            Err(ChainsawError::Cancelled) => return,
            Err(e) => {
                // abandoned without marking; at-least-once per chunk
                error!(error = %e, chunk_count = chunk_ids.len(), "graph extraction batch failed");
                return;
            }
        };

        if let Err(e) = self.indexer.db.mark_chunks_extracted(&chunk_ids) {
            error!(error = %e, "failed to mark chunks extracted");
            return;
        }

        info!(
            chunks_processed = chunk_ids.len(),
            edges_created = edge_count,
            "graph extraction batch completed"
        );

        if let Ok(stats) = self.indexer.db.extraction_stats() {
            if stats.pending > 0 {
                info!(
                    total = stats.total,
                    extracted = stats.extracted,
                    pending = stats.pending,
                    "graph extraction progress"
                );
            }
        }
    }

    /// Extract relations for a specific set of chunks through batched
    /// provider calls, returning the number of edges stored
    pub async fn process_graph_batch(
        &self,
        chunk_ids: &[i64],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let chunks = self.indexer.db.get_chunks_by_ids(chunk_ids)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let batch_size = self.indexer.config.graph_batch_size.max(1);
        let mut total_edges = 0usize;

        for (batch_num, sub_batch) in chunks.chunks(batch_size).enumerate() {
            let inputs: Vec<ChunkInput> = sub_batch
                .iter()
                .map(|chunk| ChunkInput {
                    chunk_id: chunk.chunk_id,
                    file_id: chunk.file_id,
                    file_path: chunk.file_path.clone(),
                    content: chunk.content_snippet.clone(),
                })
                .collect();

            let edges = tokio::select! {
                _ = cancel.cancelled() => return Err(ChainsawError::Cancelled),
                result = self
                    .indexer
                    .extractor
                    .extract_edges_batch(&self.indexer.config.graph_model, &inputs) => {
                    result.map_err(|e| match e {
                        ChainsawError::Provider { kind, message } => ChainsawError::Provider {
                            kind,
                            message: format!("batch {}: {}", batch_num + 1, message),
                        },
                        other => other,
                    })?
                }
            };

            for edge in edges {
                // edges with unresolvable endpoints are skipped
                let Ok(source_id) = self.indexer.db.upsert_entity(
                    &edge.edge.source,
                    &edge.edge.source_type,
                    edge.chunk_id,
                ) else {
                    continue;
                };
                let Ok(target_id) = self.indexer.db.upsert_entity(
                    &edge.edge.target,
                    &edge.edge.target_type,
                    edge.chunk_id,
                ) else {
                    continue;
                };
                if self
                    .indexer
                    .db
                    .upsert_edge(source_id, target_id, &edge.edge.relation_type, edge.chunk_id)
                    .is_err()
                {
                    continue;
                }
                total_edges += 1;
            }

            debug!(
                batch = batch_num + 1,
                chunks = sub_batch.len(),
                "graph sub-batch stored"
            );
        }

        Ok(total_edges)
    }
}
