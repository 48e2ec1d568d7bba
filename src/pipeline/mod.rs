//! Ingestion pipeline
//!
//! Admission turns paths into durable pending rows; two long-running
//! workers drain them. There is no in-memory queue: the queue IS the
//! `files.status = 'pending'` projection of the store, which makes the
//! pipeline crash-safe and inspectable.

pub mod embed_worker;
pub mod graph_worker;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chunker::{chunk_content, ChunkerConfig};
use crate::db::Database;
use crate::error::{ChainsawError, Result};
use crate::filter::IngestFilter;
use crate::llm::{EmbeddingProvider, GraphExtractor};
use crate::types::FileRecord;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    pub embed_model: String,
    pub graph_model: String,
    /// Chunks per embedding provider call
    pub embed_batch_size: usize,
    /// Chunks per graph-extraction provider call
    pub graph_batch_size: usize,
    /// Bound on in-flight embedding requests
    pub max_concurrency: usize,
    /// Pause between embedding batches, to avoid overrunning the provider
    pub batch_pause: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            embed_model: "nomic-embed-text".to_string(),
            graph_model: "qwen2.5:3b".to_string(),
            embed_batch_size: 20,
            graph_batch_size: 100,
            max_concurrency: 5,
            batch_pause: Duration::from_secs(2),
        }
    }
}

/// Coordinates chunking, embedding, and graph extraction against the store
pub struct Indexer {
    pub(crate) config: IndexerConfig,
    pub(crate) db: Arc<Database>,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) extractor: Arc<dyn GraphExtractor>,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn GraphExtractor>,
    ) -> Self {
        Self {
            config,
            db,
            embedder,
            extractor,
        }
    }

    /// Per-file indexing, steps of one worker unit:
    /// re-read, digest, change short-circuit, chunk, embed, insert.
    ///
    /// The short-circuit fires only on a first attempt against a file that
    /// already has chunks: re-admission of unchanged content then becomes
    /// a no-op that never reaches the provider. Retries always rebuild.
    pub async fn index_file(&self, file: &FileRecord, cancel: &CancellationToken) -> Result<()> {
        let path = Path::new(&file.path);

        if is_binary_file(path)? {
            debug!(path = %file.path, "skipping binary file");
            return Ok(());
        }

        let content = std::fs::read(path).map_err(|e| ChainsawError::io("read", path, e))?;
        let metadata =
            std::fs::metadata(path).map_err(|e| ChainsawError::io("stat", path, e))?;
        let mod_time = mod_time_secs(&metadata);
        let digest = sha256_hex(&content);

        let unchanged = !self.db.has_file_changed(&file.path, mod_time, &digest)?;
        if unchanged
            && file.retry_count == 0
            && self.db.count_chunks_for_file(file.id)? > 0
        {
            debug!(path = %file.path, "content unchanged, skipping re-index");
            self.db.mark_file_indexed(file.id)?;
            return Ok(());
        }

        let file_id = self.db.upsert_file(&file.path, mod_time, &digest)?;
        // the two-pass model rebuilds all downstream state from scratch
        self.db.delete_chunks_for_file(file_id)?;

        let content = String::from_utf8_lossy(&content).into_owned();
        let pieces = chunk_content(&content, &self.config.chunker);
        debug!(path = %file.path, chunks = pieces.len(), "chunked file");

        if pieces.is_empty() {
            self.db.mark_file_indexed(file_id)?;
            return Ok(());
        }

        let batch_size = self.config.embed_batch_size.max(1);
        let batch_count = pieces.len().div_ceil(batch_size);
        for (i, batch) in pieces.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();

            let embeddings = tokio::select! {
                _ = cancel.cancelled() => return Err(ChainsawError::Cancelled),
                result = self
                    .embedder
                    .embed(&self.config.embed_model, &texts, self.config.max_concurrency) => result?,
            };

            for (piece, embedding) in batch.iter().zip(embeddings.iter()) {
                self.db.insert_chunk(
                    file_id,
                    &piece.content,
                    embedding,
                    piece.start_line,
                    piece.end_line,
                )?;
            }

            if i + 1 < batch_count {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ChainsawError::Cancelled),
                    _ = sleep(self.config.batch_pause) => {}
                }
            }
        }

        self.db.mark_file_indexed(file_id)?;
        Ok(())
    }
}

/// Outcome of a bulk admission walk
#[derive(Debug, Default, Clone, Copy)]
pub struct AdmissionStats {
    pub queued: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Admit a single path: filter, read, digest, record mod time, queue.
/// Returns false when the filter or binary sniff rejected the path.
pub fn queue_path(db: &Database, filter: &IngestFilter, path: &Path) -> Result<bool> {
    if !filter.admits(path) {
        return Ok(false);
    }
    if is_binary_file(path)? {
        return Ok(false);
    }

    let content = std::fs::read(path).map_err(|e| ChainsawError::io("read", path, e))?;
    let metadata = std::fs::metadata(path).map_err(|e| ChainsawError::io("stat", path, e))?;

    db.mark_file_pending(
        &path.to_string_lossy(),
        mod_time_secs(&metadata),
        &sha256_hex(&content),
    )?;
    Ok(true)
}

/// Walk a directory tree and queue every admissible file
pub fn queue_tree(db: &Database, filter: &IngestFilter, root: &Path) -> AdmissionStats {
    let mut stats = AdmissionStats::default();

    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .build();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                stats.errors += 1;
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        match queue_path(db, filter, entry.path()) {
            Ok(true) => stats.queued += 1,
            Ok(false) => stats.skipped += 1,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "failed to queue file");
                stats.errors += 1;
            }
        }
    }

    info!(
        queued = stats.queued,
        skipped = stats.skipped,
        errors = stats.errors,
        "admission walk complete"
    );
    stats
}

pub(crate) fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn mod_time_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Application media subtypes that are still text under the skip policy
const TEXTUAL_APPLICATION_TYPES: &[&str] =
    &["json", "xml", "javascript", "x-sh", "x-perl", "x-python"];

/// Binary-file skip policy: sniff up to 512 bytes. `text/*` is admitted;
/// `application/*` only for the textual allow-list; everything else is
/// treated as binary.
pub fn is_binary_file(path: &Path) -> Result<bool> {
    let mut file =
        std::fs::File::open(path).map_err(|e| ChainsawError::io("open", path, e))?;
    let mut buffer = [0u8; 512];
    let mut read = 0;
    loop {
        let n = file
            .read(&mut buffer[read..])
            .map_err(|e| ChainsawError::io("read", path, e))?;
        if n == 0 {
            break;
        }
        read += n;
        if read == buffer.len() {
            break;
        }
    }

    let content_type = detect_content_type(&buffer[..read]);
    if let Some(subtype) = content_type.strip_prefix("application/") {
        return Ok(!TEXTUAL_APPLICATION_TYPES
            .iter()
            .any(|allowed| subtype.contains(allowed)));
    }
    Ok(!content_type.starts_with("text/"))
}

/// Minimal content-type sniffer: byte-order marks, a short magic-number
/// table, then a binary-byte scan deciding text/plain vs octet-stream.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    const MAGIC: &[(&[u8], &str)] = &[
        (b"\xEF\xBB\xBF", "text/plain; charset=utf-8"),
        (b"\xFF\xFE", "text/plain; charset=utf-16le"),
        (b"\xFE\xFF", "text/plain; charset=utf-16be"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1F\x8B\x08", "application/x-gzip"),
        (b"\x7FELF", "application/octet-stream"),
        (b"\x89PNG\r\n\x1A\n", "image/png"),
        (b"GIF8", "image/gif"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"<?xml", "text/xml; charset=utf-8"),
    ];

    for (signature, content_type) in MAGIC {
        if data.starts_with(signature) {
            return content_type;
        }
    }

    // Bytes outside the textual range mean binary; \t \n \x0C \r and ESC
    // are fine.
    let binary = data
        .iter()
        .any(|&b| b == 0 || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | 0x1B)));
    if binary {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256_lowercase_hex() {
        let digest = sha256_hex(b"hello");
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_detect_content_type_text() {
        assert!(detect_content_type(b"fn main() {}\n").starts_with("text/"));
        assert!(detect_content_type(b"{\"key\": 1}\n").starts_with("text/"));
        assert!(detect_content_type(b"").starts_with("text/"));
    }

    #[test]
    fn test_detect_content_type_binary() {
        assert_eq!(
            detect_content_type(b"\x00\x01\x02\x03"),
            "application/octet-stream"
        );
        assert_eq!(detect_content_type(b"\x7FELF\x02\x01"), "application/octet-stream");
        assert_eq!(detect_content_type(b"\x89PNG\r\n\x1A\nrest"), "image/png");
    }

    #[test]
    fn test_detect_content_type_xml_is_textual() {
        assert_eq!(
            detect_content_type(b"<?xml version=\"1.0\"?>"),
            "text/xml; charset=utf-8"
        );
    }

    #[test]
    fn test_is_binary_file() {
        let dir = tempfile::tempdir().unwrap();

        let text = dir.path().join("a.rs");
        std::fs::write(&text, "fn main() {}\n").unwrap();
        assert!(!is_binary_file(&text).unwrap());

        let binary = dir.path().join("a.bin");
        let mut f = std::fs::File::create(&binary).unwrap();
        f.write_all(&[0u8, 159, 146, 150]).unwrap();
        drop(f);
        assert!(is_binary_file(&binary).unwrap());
    }

    #[test]
    fn test_queue_path_applies_filter_and_sniff() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory(4, true).unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let filter = IngestFilter::new(&[root], &[], &[], &[]);

        let good = dir.path().join("keep.rs");
        std::fs::write(&good, "fn keep() {}\n").unwrap();
        assert!(queue_path(&db, &filter, &good).unwrap());

        let binary = dir.path().join("skip.bin");
        std::fs::write(&binary, [0u8, 1, 2, 3]).unwrap();
        assert!(!queue_path(&db, &filter, &binary).unwrap());

        let pending = db.get_pending_files(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].path.ends_with("keep.rs"));
        assert_eq!(pending[0].content_hash.len(), 64);
    }

    #[test]
    fn test_queue_tree_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("sub/b.rs"), "fn b() {}\n").unwrap();
        std::fs::write(dir.path().join("c.bin"), [0u8, 1, 2]).unwrap();

        let db = Database::in_memory(4, true).unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let filter = IngestFilter::new(&[root], &[], &[], &[]);

        let stats = queue_tree(&db, &filter, dir.path());
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(db.get_pending_files(10).unwrap().len(), 2);
    }
}
