//! Chunk storage and vector search
//!
//! Chunks live in the `vec_chunks` vec0 virtual table so one KNN query
//! returns ranking plus displayable context (snippet and line range).
//! Embeddings are serialized as little-endian float32 for sqlite-vec.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension, Row};
use zerocopy::AsBytes;

use crate::error::{ChainsawError, Result};
use crate::types::{Chunk, ChunkWithPath, RelatedChunk, SearchHit};

use super::Database;

/// Options for the legacy chunk-to-chunk neighbor lookup
#[derive(Debug, Clone, Copy)]
pub struct GetNeighborsOptions {
    pub chunk_id: i64,
    pub max_depth: i64,
    pub min_weight: f64,
    pub limit: i64,
}

/// A chunk reached through the legacy adjacency
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub chunk_id: i64,
    pub depth: i64,
    pub total_weight: f64,
    pub relation_type: String,
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        chunk_id: row.get(0)?,
        file_id: row.get(1)?,
        content_snippet: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
    })
}

fn row_to_chunk_with_path(row: &Row) -> rusqlite::Result<ChunkWithPath> {
    Ok(ChunkWithPath {
        chunk_id: row.get(0)?,
        file_id: row.get(1)?,
        file_path: row.get(2)?,
        content_snippet: row.get(3)?,
        start_line: row.get(4)?,
        end_line: row.get(5)?,
    })
}

impl Database {
    /// Insert a chunk with its embedding, returning the new chunk id.
    ///
    /// Fails without writing a row when the embedding length differs from
    /// the store's configured dimension.
    pub fn insert_chunk(
        &self,
        file_id: i64,
        content_snippet: &str,
        embedding: &[f32],
        start_line: i64,
        end_line: i64,
    ) -> Result<i64> {
        if embedding.len() != self.embedding_dim() {
            return Err(ChainsawError::Config(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.embedding_dim(),
                embedding.len()
            )));
        }

        let conn = self.conn();
        conn.execute(
            "INSERT INTO vec_chunks (file_id, content_snippet, start_line, end_line, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file_id,
                content_snippet,
                start_line,
                end_line,
                embedding.as_bytes()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch a chunk by id
    pub fn get_chunk(&self, chunk_id: i64) -> Result<Option<Chunk>> {
        let chunk = self
            .conn()
            .query_row(
                "SELECT chunk_id, file_id, content_snippet, start_line, end_line
                 FROM vec_chunks WHERE chunk_id = ?1",
                [chunk_id],
                row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    /// All chunks for a file, in insertion (ascending offset) order
    pub fn get_chunks_for_file(&self, file_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, file_id, content_snippet, start_line, end_line
             FROM vec_chunks WHERE file_id = ?1 ORDER BY chunk_id",
        )?;
        let rows = stmt.query_map([file_id], row_to_chunk)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Every stored chunk, ordered by id
    pub fn get_all_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, file_id, content_snippet, start_line, end_line
             FROM vec_chunks ORDER BY chunk_id",
        )?;
        let rows = stmt.query_map([], row_to_chunk)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Every stored chunk joined with its file path in one pass, for bulk
    /// export to the graph worker
    pub fn get_all_chunks_with_paths(&self) -> Result<Vec<ChunkWithPath>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT v.chunk_id, v.file_id, f.path, v.content_snippet, v.start_line, v.end_line
             FROM vec_chunks v
             JOIN files f ON v.file_id = f.id
             ORDER BY v.chunk_id",
        )?;
        let rows = stmt.query_map([], row_to_chunk_with_path)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Batch fetch by id, preserving the caller's order. Unknown ids are
    /// silently absent from the result.
    pub fn get_chunks_by_ids(&self, chunk_ids: &[i64]) -> Result<Vec<ChunkWithPath>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; chunk_ids.len()].join(",");
        let sql = format!(
            "SELECT v.chunk_id, v.file_id, f.path, v.content_snippet, v.start_line, v.end_line
             FROM vec_chunks v
             JOIN files f ON v.file_id = f.id
             WHERE v.chunk_id IN ({})",
            placeholders
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(chunk_ids.iter()),
            row_to_chunk_with_path,
        )?;

        let mut by_id: HashMap<i64, ChunkWithPath> = HashMap::new();
        for row in rows {
            let chunk = row?;
            by_id.insert(chunk.chunk_id, chunk);
        }

        Ok(chunk_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    /// Delete all chunks for a file, cascading to the entities, edges, and
    /// watermark rows derived from them. One transaction.
    pub fn delete_chunks_for_file(&self, file_id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // Edge rows tagged with these chunks whose endpoints live elsewhere
        tx.execute(
            "DELETE FROM graph_edges WHERE chunk_id IN
             (SELECT chunk_id FROM vec_chunks WHERE file_id = ?1)",
            [file_id],
        )?;
        // Entities owned by these chunks; entity FKs cascade remaining edges
        tx.execute(
            "DELETE FROM entities WHERE chunk_id IN
             (SELECT chunk_id FROM vec_chunks WHERE file_id = ?1)",
            [file_id],
        )?;
        tx.execute(
            "DELETE FROM chunk_graph_state WHERE chunk_id IN
             (SELECT chunk_id FROM vec_chunks WHERE file_id = ?1)",
            [file_id],
        )?;
        tx.execute("DELETE FROM vec_chunks WHERE file_id = ?1", [file_id])?;

        tx.commit()?;
        Ok(())
    }

    /// Number of chunks currently stored for a file
    pub fn count_chunks_for_file(&self, file_id: i64) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM vec_chunks WHERE file_id = ?1",
            [file_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total number of chunks
    pub fn count_chunks(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM vec_chunks", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Cosine distance between two stored chunk embeddings
    pub fn chunk_distance(&self, chunk_a: i64, chunk_b: i64) -> Result<f64> {
        let distance = self.conn().query_row(
            "SELECT vec_distance_cosine(a.embedding, b.embedding)
             FROM vec_chunks a, vec_chunks b
             WHERE a.chunk_id = ?1 AND b.chunk_id = ?2",
            params![chunk_a, chunk_b],
            |row| row.get(0),
        )?;
        Ok(distance)
    }

    /// K-nearest-neighbor search by cosine distance, ascending. The
    /// optional `path_filter` is a SQL LIKE pattern over file paths
    /// (typically an absolute prefix followed by '%').
    pub fn search_similar(
        &self,
        query_embedding: &[f32],
        limit: i64,
        path_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if query_embedding.len() != self.embedding_dim() {
            return Err(ChainsawError::Config(format!(
                "query embedding dimension mismatch: expected {}, got {}",
                self.embedding_dim(),
                query_embedding.len()
            )));
        }
        let limit = if limit <= 0 { 10 } else { limit };

        let mut sql = String::from(
            "SELECT c.chunk_id, c.file_id, c.content_snippet, c.start_line, c.end_line,
                    distance, f.path
             FROM vec_chunks c
             JOIN files f ON c.file_id = f.id
             WHERE embedding MATCH ?1
               AND k = ?2",
        );
        let mut args: Vec<rusqlite::types::Value> = vec![
            rusqlite::types::Value::Blob(query_embedding.as_bytes().to_vec()),
            rusqlite::types::Value::Integer(limit),
        ];
        if let Some(pattern) = path_filter {
            sql.push_str("\n               AND f.path LIKE ?3");
            args.push(rusqlite::types::Value::Text(pattern.to_string()));
        }
        sql.push_str("\n             ORDER BY distance");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(SearchHit {
                chunk: Chunk {
                    chunk_id: row.get(0)?,
                    file_id: row.get(1)?,
                    content_snippet: row.get(2)?,
                    start_line: row.get(3)?,
                    end_line: row.get(4)?,
                },
                distance: row.get(5)?,
                file_path: row.get(6)?,
                related: Vec::new(),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Like `search_similar`, but additionally attaches up to
    /// `neighbors_per_hit` graph neighbors per hit through the legacy
    /// chunk adjacency. Neighbors are re-filtered against the same path
    /// prefix.
    pub fn search_with_relations(
        &self,
        query_embedding: &[f32],
        limit: i64,
        max_depth: i64,
        path_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let mut results = self.search_similar(query_embedding, limit, path_filter)?;

        for hit in &mut results {
            let neighbors = self.get_neighbors(GetNeighborsOptions {
                chunk_id: hit.chunk.chunk_id,
                max_depth,
                min_weight: 0.0,
                limit: 5,
            })?;

            for n in neighbors {
                let Some(chunk) = self.get_chunk(n.chunk_id)? else {
                    continue;
                };

                if let Some(pattern) = path_filter {
                    let prefix = pattern.trim_end_matches('%');
                    match self.get_file_by_id(chunk.file_id)? {
                        Some(file) if file.path.starts_with(prefix) => {}
                        _ => continue,
                    }
                }

                hit.related.push(RelatedChunk {
                    chunk,
                    relation_type: n.relation_type,
                    weight: n.total_weight,
                    depth: n.depth,
                });
            }
        }

        Ok(results)
    }

    /// Legacy chunk-to-chunk adjacency. The entity graph replaced it; this
    /// returns no neighbors but the expanded-search call sites stay wired
    /// so entity-level expansion can slot in later.
    pub fn get_neighbors(&self, _opts: GetNeighborsOptions) -> Result<Vec<Neighbor>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_store() -> Database {
        Database::in_memory(4, false).unwrap()
    }

    fn unit(v: [f32; 4]) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    #[test]
    fn test_insert_and_get_chunk() {
        let db = vec_store();
        let file_id = db.upsert_file("/src/a.rs", 1, "h").unwrap();
        let id = db
            .insert_chunk(file_id, "fn main() {}\n", &unit([1.0, 0.0, 0.0, 0.0]), 1, 1)
            .unwrap();

        let chunk = db.get_chunk(id).unwrap().unwrap();
        assert_eq!(chunk.file_id, file_id);
        assert_eq!(chunk.content_snippet, "fn main() {}\n");
        assert_eq!((chunk.start_line, chunk.end_line), (1, 1));
    }

    #[test]
    fn test_insert_chunk_rejects_wrong_dimension() {
        let db = vec_store();
        let file_id = db.upsert_file("/src/a.rs", 1, "h").unwrap();
        let err = db
            .insert_chunk(file_id, "x", &[1.0, 0.0], 1, 1)
            .unwrap_err();
        assert!(matches!(err, ChainsawError::Config(_)));
        assert_eq!(db.count_chunks().unwrap(), 0);
    }

    #[test]
    fn test_search_similar_ranks_by_distance() {
        let db = vec_store();
        let file_id = db.upsert_file("/src/a.rs", 1, "h").unwrap();
        db.insert_chunk(file_id, "alpha", &unit([1.0, 0.0, 0.0, 0.0]), 1, 1)
            .unwrap();
        db.insert_chunk(file_id, "beta", &unit([0.0, 1.0, 0.0, 0.0]), 2, 2)
            .unwrap();
        db.insert_chunk(file_id, "gamma", &unit([0.9, 0.1, 0.0, 0.0]), 3, 3)
            .unwrap();

        let hits = db
            .search_similar(&unit([1.0, 0.0, 0.0, 0.0]), 3, None)
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.content_snippet, "alpha");
        assert!(hits[0].distance < hits[1].distance);
        assert_eq!(hits[1].chunk.content_snippet, "gamma");
    }

    #[test]
    fn test_search_similar_path_filter() {
        let db = vec_store();
        let a = db.upsert_file("/proj/src/a.rs", 1, "a").unwrap();
        let b = db.upsert_file("/other/b.rs", 1, "b").unwrap();
        db.insert_chunk(a, "in scope", &unit([1.0, 0.0, 0.0, 0.0]), 1, 1)
            .unwrap();
        db.insert_chunk(b, "out of scope", &unit([1.0, 0.0, 0.0, 0.0]), 1, 1)
            .unwrap();

        let hits = db
            .search_similar(&unit([1.0, 0.0, 0.0, 0.0]), 10, Some("/proj/%"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "/proj/src/a.rs");
    }

    #[test]
    fn test_chunks_by_ids_preserves_caller_order() {
        let db = vec_store();
        let file_id = db.upsert_file("/src/a.rs", 1, "h").unwrap();
        let c1 = db
            .insert_chunk(file_id, "one", &unit([1.0, 0.0, 0.0, 0.0]), 1, 1)
            .unwrap();
        let c2 = db
            .insert_chunk(file_id, "two", &unit([0.0, 1.0, 0.0, 0.0]), 2, 2)
            .unwrap();
        let c3 = db
            .insert_chunk(file_id, "three", &unit([0.0, 0.0, 1.0, 0.0]), 3, 3)
            .unwrap();

        let chunks = db.get_chunks_by_ids(&[c3, c1, c2]).unwrap();
        let snippets: Vec<_> = chunks.iter().map(|c| c.content_snippet.as_str()).collect();
        assert_eq!(snippets, vec!["three", "one", "two"]);
        assert_eq!(chunks[0].file_path, "/src/a.rs");
    }

    #[test]
    fn test_delete_chunks_cascades_graph_state() {
        let db = vec_store();
        let file_id = db.upsert_file("/src/a.rs", 1, "h").unwrap();
        let chunk = db
            .insert_chunk(file_id, "fn a() { b() }", &unit([1.0, 0.0, 0.0, 0.0]), 1, 1)
            .unwrap();

        let src = db.upsert_entity("a", "FUNCTION", chunk).unwrap();
        let dst = db.upsert_entity("b", "FUNCTION", chunk).unwrap();
        db.upsert_edge(src, dst, "calls", chunk).unwrap();
        db.mark_chunks_extracted(&[chunk]).unwrap();

        db.delete_chunks_for_file(file_id).unwrap();
        assert_eq!(db.count_chunks().unwrap(), 0);
        assert_eq!(db.count_edges().unwrap(), 0);
        assert!(db.get_entities_by_name("a").unwrap().is_empty());
        let stats = db.extraction_stats().unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.extracted, 0);
    }

    #[test]
    fn test_chunk_distance_identical_is_zero() {
        let db = vec_store();
        let file_id = db.upsert_file("/src/a.rs", 1, "h").unwrap();
        let e = unit([0.5, 0.5, 0.0, 0.0]);
        let a = db.insert_chunk(file_id, "a", &e, 1, 1).unwrap();
        let b = db.insert_chunk(file_id, "b", &e, 2, 2).unwrap();
        let d = db.chunk_distance(a, b).unwrap();
        assert!(d.abs() < 1e-5);
    }

    #[test]
    fn test_expanded_search_has_no_neighbors_from_stub() {
        let db = vec_store();
        let file_id = db.upsert_file("/src/a.rs", 1, "h").unwrap();
        db.insert_chunk(file_id, "a", &unit([1.0, 0.0, 0.0, 0.0]), 1, 1)
            .unwrap();
        let hits = db
            .search_with_relations(&unit([1.0, 0.0, 0.0, 0.0]), 5, 1, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].related.is_empty());
    }
}
