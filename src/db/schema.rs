//! Database schema definition

/// Schema version recorded in the meta table
pub const SCHEMA_VERSION: &str = "2.4.0";

/// Standard keys stored in the meta table
pub const META_KEY_SCHEMA_VERSION: &str = "schema_version";
pub const META_KEY_CREATED_AT: &str = "created_at";
pub const META_KEY_LAST_INDEXED: &str = "last_indexed";
pub const META_KEY_EMBEDDING_DIM: &str = "embedding_dimension";

/// Tables and indexes that do not depend on the sqlite-vec extension
pub const SCHEMA: &str = r#"
-- Meta table: schema version, creation timestamp, embedding dimension
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Files table: registry plus the durable work queue.
-- The work queue IS the status = 'pending' projection of this table.
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    last_mod_time INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    indexed_at TEXT,
    status TEXT DEFAULT 'indexed',
    error_message TEXT,
    retry_count INTEGER DEFAULT 0,
    queued_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash);
CREATE INDEX IF NOT EXISTS idx_files_status ON files(status, queued_at);

-- Entities table: code symbols extracted from chunks.
-- No FK to vec_chunks: SQLite rejects foreign keys into virtual tables.
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    chunk_id INTEGER NOT NULL,
    UNIQUE(name, entity_type, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
CREATE INDEX IF NOT EXISTS idx_entities_chunk ON entities(chunk_id);

-- Graph edges between entities, tagged with the producing chunk
CREATE TABLE IF NOT EXISTS graph_edges (
    source_entity_id INTEGER NOT NULL,
    target_entity_id INTEGER NOT NULL,
    relation_type TEXT NOT NULL,
    chunk_id INTEGER NOT NULL,
    weight REAL DEFAULT 1.0,
    PRIMARY KEY (source_entity_id, target_entity_id, chunk_id),
    FOREIGN KEY(source_entity_id) REFERENCES entities(id) ON DELETE CASCADE,
    FOREIGN KEY(target_entity_id) REFERENCES entities(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_graph_source ON graph_edges(source_entity_id);
CREATE INDEX IF NOT EXISTS idx_graph_target ON graph_edges(target_entity_id);
CREATE INDEX IF NOT EXISTS idx_graph_relation ON graph_edges(relation_type);

-- Per-chunk graph-extraction watermark. Separate table so the chunk/vector
-- table stays pure; a missing row means extracted = false.
CREATE TABLE IF NOT EXISTS chunk_graph_state (
    chunk_id INTEGER PRIMARY KEY,
    graph_extracted INTEGER DEFAULT 0,
    extracted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_chunk_graph_extracted ON chunk_graph_state(graph_extracted);
"#;

/// Virtual table for vector similarity search. The embedding dimension is
/// fixed at creation time, so this is a template filled in by `Database::open`.
pub const VEC_CHUNKS_TEMPLATE: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    chunk_id INTEGER PRIMARY KEY,
    file_id INTEGER,
    content_snippet TEXT,
    start_line INTEGER,
    end_line INTEGER,
    embedding FLOAT[{dim}] distance_metric=cosine
);
"#;

/// Pragmas applied at open, before any table exists
pub const ENABLE_WAL_MODE: &str = "PRAGMA journal_mode=WAL;";
pub const SET_WAL_CHECKPOINT: &str = "PRAGMA wal_autocheckpoint=1000;";
pub const ENABLE_FOREIGN_KEYS: &str = "PRAGMA foreign_keys=ON;";

/// Render the vec_chunks DDL for a concrete embedding dimension
pub fn vec_chunks_schema(dim: usize) -> String {
    VEC_CHUNKS_TEMPLATE.replace("{dim}", &dim.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_chunks_schema_renders_dimension() {
        let ddl = vec_chunks_schema(768);
        assert!(ddl.contains("FLOAT[768]"));
        assert!(ddl.contains("distance_metric=cosine"));
        assert!(!ddl.contains("{dim}"));
    }
}
