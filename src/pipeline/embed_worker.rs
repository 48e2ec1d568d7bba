//! Embedding worker
//!
//! Polls the durable queue, drains pending files FIFO by queue timestamp,
//! and makes embeddings durable. Graph extraction never happens here; the
//! chunk watermark hands that work to the graph worker.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::ChainsawError;
use crate::types::FileRecord;

use super::Indexer;

/// Embedding worker configuration
#[derive(Debug, Clone)]
pub struct EmbedWorkerConfig {
    pub poll_interval: Duration,
    /// Pending rows fetched per tick
    pub batch_size: i64,
    /// Attempts before a file is marked failed
    pub max_retries: i64,
}

impl Default for EmbedWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 5,
            max_retries: 3,
        }
    }
}

/// Drains the pending-file queue into chunk rows with embeddings
pub struct EmbedWorker {
    indexer: Arc<Indexer>,
    config: EmbedWorkerConfig,
}

impl EmbedWorker {
    pub fn new(indexer: Arc<Indexer>, config: EmbedWorkerConfig) -> Self {
        Self { indexer, config }
    }

    fn db(&self) -> &Database {
        &self.indexer.db
    }

    /// Worker loop. Processes one batch immediately, then on every poll
    /// tick until the token cancels.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "embedding worker started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("embedding worker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.process_batch(&cancel).await;
                }
            }
        }
    }

    /// Fetch and process one batch of pending files, in queue order
    pub async fn process_batch(&self, cancel: &CancellationToken) {
        let files = match self.db().get_pending_files(self.config.batch_size) {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "failed to fetch pending files");
                return;
            }
        };

        if files.is_empty() {
            return;
        }
        debug!(count = files.len(), "processing pending batch");

        for file in files {
            if cancel.is_cancelled() {
                return;
            }
            self.process_file(&file, cancel).await;
        }
    }

    async fn process_file(&self, file: &FileRecord, cancel: &CancellationToken) {
        // advisory lock; a concurrent second mark is a harmless no-op
        if let Err(e) = self.db().mark_file_processing(file.id) {
            error!(path = %file.path, error = %e, "failed to mark file processing");
            return;
        }

        debug!(path = %file.path, retry = file.retry_count, "processing file");

        match self.indexer.index_file(file, cancel).await {
            Ok(()) => {
                info!(path = %file.path, "indexed file");
            }
            Err(ChainsawError::Cancelled) => {
                // leave the row in processing; startup recovery re-queues it
            }
            Err(e) => self.handle_failure(file, e),
        }
    }

    /// Bounded retry: below the cap the file goes back to pending with an
    /// incremented counter, at the cap it is marked failed with the error.
    fn handle_failure(&self, file: &FileRecord, index_err: ChainsawError) {
        let retry_count = file.retry_count + 1;

        if retry_count < self.config.max_retries {
            if let Err(e) = self.db().requeue_file(
                &file.path,
                file.last_mod_time,
                &file.content_hash,
                retry_count,
            ) {
                error!(path = %file.path, error = %e, "failed to requeue file");
                return;
            }
            warn!(
                path = %file.path,
                retry = retry_count,
                max_retries = self.config.max_retries,
                error = %index_err,
                "indexing failed, will retry"
            );
        } else {
            if let Err(e) =
                self.db()
                    .mark_file_failed(file.id, &index_err.to_string(), retry_count)
            {
                error!(path = %file.path, error = %e, "failed to mark file failed");
                return;
            }
            error!(
                path = %file.path,
                retries = retry_count,
                error = %index_err,
                "indexing failed permanently"
            );
        }
    }
}
