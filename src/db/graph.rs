//! Entity/edge graph and the extraction watermark
//!
//! Entities are keyed by (name, entity_type, chunk_id); edges by
//! (source, target, chunk_id). Duplicate upserts under concurrency are
//! absorbed by the ON CONFLICT clauses. The watermark table records which
//! chunks have had graph extraction performed; a missing row means false.

use chrono::Utc;
use rusqlite::{params, Row};

use crate::error::Result;
use crate::types::{Entity, EntityEdge, ExtractionStats};

use super::Database;

fn row_to_entity(row: &Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        chunk_id: row.get(3)?,
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<EntityEdge> {
    Ok(EntityEdge {
        source_entity_id: row.get(0)?,
        target_entity_id: row.get(1)?,
        relation_type: row.get(2)?,
        chunk_id: row.get(3)?,
        weight: row.get(4)?,
    })
}

impl Database {
    /// Insert-or-fetch an entity by (name, entity_type, chunk_id),
    /// returning its id
    pub fn upsert_entity(&self, name: &str, entity_type: &str, chunk_id: i64) -> Result<i64> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO entities (name, entity_type, chunk_id) VALUES (?1, ?2, ?3)",
            params![name, entity_type, chunk_id],
        )?;
        if inserted > 0 {
            return Ok(conn.last_insert_rowid());
        }

        let id = conn.query_row(
            "SELECT id FROM entities WHERE name = ?1 AND entity_type = ?2 AND chunk_id = ?3",
            params![name, entity_type, chunk_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Insert or replace an edge by (source, target, chunk_id), keeping the
    /// relation type and weight current. Weight defaults to 1.0.
    pub fn upsert_edge(
        &self,
        source_id: i64,
        target_id: i64,
        relation_type: &str,
        chunk_id: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO graph_edges (source_entity_id, target_entity_id, relation_type, chunk_id, weight)
             VALUES (?1, ?2, ?3, ?4, 1.0)
             ON CONFLICT(source_entity_id, target_entity_id, chunk_id) DO UPDATE SET
                 relation_type = excluded.relation_type,
                 weight = excluded.weight",
            params![source_id, target_id, relation_type, chunk_id],
        )?;
        Ok(())
    }

    /// All entities with the given name, across chunks
    pub fn get_entities_by_name(&self, name: &str) -> Result<Vec<Entity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, entity_type, chunk_id FROM entities WHERE name = ?1",
        )?;
        let rows = stmt.query_map([name], row_to_entity)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// All entities of a given type, ordered by name
    pub fn get_entities_by_type(&self, entity_type: &str) -> Result<Vec<Entity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, entity_type, chunk_id FROM entities
             WHERE entity_type = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map([entity_type], row_to_entity)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Edges incident to an entity, outgoing or incoming, heaviest first
    pub fn get_entity_edges(&self, entity_id: i64) -> Result<Vec<EntityEdge>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT source_entity_id, target_entity_id, relation_type, chunk_id, weight
             FROM graph_edges
             WHERE source_entity_id = ?1 OR target_entity_id = ?1
             ORDER BY weight DESC",
        )?;
        let rows = stmt.query_map([entity_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Entities one hop away from the given entity, excluding itself, with
    /// an optional relation-type filter
    pub fn find_related_entities(
        &self,
        entity_id: i64,
        relation_type: Option<&str>,
    ) -> Result<Vec<Entity>> {
        let mut sql = String::from(
            "SELECT DISTINCT e.id, e.name, e.entity_type, e.chunk_id
             FROM entities e
             JOIN graph_edges g ON (g.source_entity_id = e.id OR g.target_entity_id = e.id)
             WHERE (g.source_entity_id = ?1 OR g.target_entity_id = ?1)
               AND e.id != ?1",
        );
        let mut args: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Integer(entity_id)];
        if let Some(rel) = relation_type {
            sql.push_str(" AND g.relation_type = ?2");
            args.push(rusqlite::types::Value::Text(rel.to_string()));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_entity)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Remove every edge produced by a chunk
    pub fn delete_edges_for_chunk(&self, chunk_id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM graph_edges WHERE chunk_id = ?1", [chunk_id])?;
        Ok(())
    }

    /// Total number of graph edges
    pub fn count_edges(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM graph_edges", [], |row| row.get(0))?;
        Ok(count)
    }

    // Extraction watermark

    /// Chunk ids with no watermark row or extracted = false, FIFO by id
    pub fn chunks_needing_extraction(&self, limit: i64) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT v.chunk_id
             FROM vec_chunks v
             LEFT JOIN chunk_graph_state cgs ON v.chunk_id = cgs.chunk_id
             WHERE cgs.graph_extracted IS NULL OR cgs.graph_extracted = 0
             ORDER BY v.chunk_id
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Mark a batch of chunks extracted, all in one transaction
    pub fn mark_chunks_extracted(&self, chunk_ids: &[i64]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunk_graph_state (chunk_id, graph_extracted, extracted_at)
                 VALUES (?1, 1, ?2)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                     graph_extracted = 1,
                     extracted_at = excluded.extracted_at",
            )?;
            let now = Utc::now().to_rfc3339();
            for chunk_id in chunk_ids {
                stmt.execute(params![chunk_id, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Extraction progress: total, extracted, pending = max(0, total - extracted)
    pub fn extraction_stats(&self) -> Result<ExtractionStats> {
        let conn = self.conn();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM vec_chunks", [], |row| row.get(0))?;
        let extracted: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunk_graph_state WHERE graph_extracted = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(ExtractionStats {
            total,
            extracted,
            pending: (total - extracted).max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_store() -> Database {
        Database::in_memory(4, false).unwrap()
    }

    fn add_chunk(db: &Database, path: &str, snippet: &str) -> i64 {
        let file_id = db.upsert_file(path, 1, "hash").unwrap();
        db.insert_chunk(file_id, snippet, &[1.0, 0.0, 0.0, 0.0], 1, 1)
            .unwrap()
    }

    #[test]
    fn test_upsert_entity_is_idempotent() {
        let db = vec_store();
        let chunk = add_chunk(&db, "/src/a.rs", "fn a() {}");
        let id1 = db.upsert_entity("a", "FUNCTION", chunk).unwrap();
        let id2 = db.upsert_entity("a", "FUNCTION", chunk).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_same_name_in_other_chunk_is_distinct() {
        let db = vec_store();
        let c1 = add_chunk(&db, "/src/a.rs", "fn a() {}");
        let c2 = add_chunk(&db, "/src/b.rs", "fn a() {}");
        let id1 = db.upsert_entity("a", "FUNCTION", c1).unwrap();
        let id2 = db.upsert_entity("a", "FUNCTION", c2).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(db.get_entities_by_name("a").unwrap().len(), 2);
    }

    #[test]
    fn test_upsert_edge_replaces_relation() {
        let db = vec_store();
        let chunk = add_chunk(&db, "/src/a.rs", "fn a() { b() }");
        let a = db.upsert_entity("a", "FUNCTION", chunk).unwrap();
        let b = db.upsert_entity("b", "FUNCTION", chunk).unwrap();

        db.upsert_edge(a, b, "calls", chunk).unwrap();
        db.upsert_edge(a, b, "uses", chunk).unwrap();

        let edges = db.get_entity_edges(a).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation_type, "uses");
        assert_eq!(edges[0].weight, 1.0);
    }

    #[test]
    fn test_find_related_excludes_self_and_filters() {
        let db = vec_store();
        let chunk = add_chunk(&db, "/src/a.rs", "code");
        let a = db.upsert_entity("a", "FUNCTION", chunk).unwrap();
        let b = db.upsert_entity("b", "FUNCTION", chunk).unwrap();
        let c = db.upsert_entity("c", "TYPE", chunk).unwrap();
        db.upsert_edge(a, b, "calls", chunk).unwrap();
        db.upsert_edge(a, c, "uses", chunk).unwrap();

        let all = db.find_related_entities(a, None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.id != a));

        let calls_only = db.find_related_entities(a, Some("calls")).unwrap();
        assert_eq!(calls_only.len(), 1);
        assert_eq!(calls_only[0].name, "b");
    }

    #[test]
    fn test_entity_type_ordering() {
        let db = vec_store();
        let chunk = add_chunk(&db, "/src/a.rs", "code");
        db.upsert_entity("zeta", "FUNCTION", chunk).unwrap();
        db.upsert_entity("alpha", "FUNCTION", chunk).unwrap();
        let entities = db.get_entities_by_type("FUNCTION").unwrap();
        assert_eq!(entities[0].name, "alpha");
        assert_eq!(entities[1].name, "zeta");
    }

    #[test]
    fn test_watermark_lifecycle() {
        let db = vec_store();
        let c1 = add_chunk(&db, "/src/a.rs", "one");
        let c2 = add_chunk(&db, "/src/b.rs", "two");

        let needing = db.chunks_needing_extraction(10).unwrap();
        assert_eq!(needing, vec![c1, c2]);

        db.mark_chunks_extracted(&[c1]).unwrap();
        assert_eq!(db.chunks_needing_extraction(10).unwrap(), vec![c2]);

        let stats = db.extraction_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.pending, 1);

        // idempotent re-mark
        db.mark_chunks_extracted(&[c1, c2]).unwrap();
        assert!(db.chunks_needing_extraction(10).unwrap().is_empty());
        assert_eq!(db.extraction_stats().unwrap().pending, 0);
    }

    #[test]
    fn test_delete_edges_for_chunk() {
        let db = vec_store();
        let chunk = add_chunk(&db, "/src/a.rs", "code");
        let a = db.upsert_entity("a", "FUNCTION", chunk).unwrap();
        let b = db.upsert_entity("b", "FUNCTION", chunk).unwrap();
        db.upsert_edge(a, b, "calls", chunk).unwrap();

        db.delete_edges_for_chunk(chunk).unwrap();
        assert_eq!(db.count_edges().unwrap(), 0);
    }
}
