//! File registry and work queue operations
//!
//! The work queue is not a separate structure: it is the set of file rows
//! with status = 'pending', drained FIFO by queue timestamp. This keeps the
//! queue crash-safe and inspectable with plain SQL.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{ChainsawError, Result};
use crate::types::{FileRecord, FileStatus};

use super::Database;

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_file(row: &Row) -> rusqlite::Result<FileRecord> {
    let indexed_at: Option<String> = row.get(4)?;
    let status: Option<String> = row.get(5)?;
    let queued_at: Option<String> = row.get(8)?;
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        last_mod_time: row.get(2)?,
        content_hash: row.get(3)?,
        indexed_at: parse_ts(indexed_at),
        status: status
            .as_deref()
            .and_then(FileStatus::from_str)
            .unwrap_or(FileStatus::Indexed),
        error_message: row.get(6)?,
        retry_count: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        queued_at: parse_ts(queued_at),
    })
}

const FILE_COLUMNS: &str =
    "id, path, last_mod_time, content_hash, indexed_at, status, error_message, retry_count, queued_at";

impl Database {
    /// Insert or update a file record, returning its stable id.
    ///
    /// On conflict the modification time, hash, and indexed_at are updated
    /// in place; the id is always re-fetched since last_insert_rowid is not
    /// meaningful for upserts.
    pub fn upsert_file(&self, path: &str, mod_time: i64, content_hash: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO files (path, last_mod_time, content_hash, indexed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 last_mod_time = excluded.last_mod_time,
                 content_hash = excluded.content_hash,
                 indexed_at = excluded.indexed_at",
            params![path, mod_time, content_hash, Utc::now().to_rfc3339()],
        )?;

        let id: i64 = conn.query_row("SELECT id FROM files WHERE path = ?1", [path], |row| {
            row.get(0)
        })?;
        debug!(path, file_id = id, "upserted file");
        Ok(id)
    }

    /// Fetch a file record by path
    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {} FROM files WHERE path = ?1", FILE_COLUMNS);
        let record = self
            .conn()
            .query_row(&sql, [path], row_to_file)
            .optional()?;
        Ok(record)
    }

    /// Fetch a file record by id
    pub fn get_file_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS);
        let record = self.conn().query_row(&sql, [id], row_to_file).optional()?;
        Ok(record)
    }

    /// Delete a file and cascade to its chunks (and through them to the
    /// derived entities and edges). Absent paths error.
    pub fn delete_file(&self, path: &str) -> Result<()> {
        let Some(file) = self.get_file(path)? else {
            return Err(ChainsawError::Input(format!("file not found: {}", path)));
        };
        self.delete_chunks_for_file(file.id)?;
        self.conn()
            .execute("DELETE FROM files WHERE id = ?1", [file.id])?;
        Ok(())
    }

    /// Paginated list of files ordered by path
    pub fn list_files(&self, limit: i64, offset: i64) -> Result<Vec<FileRecord>> {
        let limit = if limit <= 0 { 100 } else { limit };
        let sql = format!(
            "SELECT {} FROM files ORDER BY path LIMIT ?1 OFFSET ?2",
            FILE_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit, offset], row_to_file)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Total number of tracked files
    pub fn count_files(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count)
    }

    /// File counts grouped by queue status
    pub fn count_files_by_status(&self) -> Result<Vec<(FileStatus, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM files GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: Option<String> = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = status.as_deref().and_then(FileStatus::from_str) {
                counts.push((status, count));
            }
        }
        Ok(counts)
    }

    /// True iff the stored hash or modification time differs from the
    /// incoming pair, or the file is not tracked at all
    pub fn has_file_changed(&self, path: &str, mod_time: i64, content_hash: &str) -> Result<bool> {
        match self.get_file(path)? {
            None => Ok(true),
            Some(file) => {
                Ok(file.last_mod_time != mod_time || file.content_hash != content_hash)
            }
        }
    }

    // Work queue

    /// Queue a file for indexing: upsert with status = pending and reset
    /// the error message and retry counter. The stored hash and mod time
    /// are written only for new rows; on conflict they keep describing the
    /// last indexed content so the worker's change detection can compare
    /// the current file against it.
    pub fn mark_file_pending(&self, path: &str, mod_time: i64, content_hash: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (path, last_mod_time, content_hash, status, queued_at, retry_count)
             VALUES (?1, ?2, ?3, 'pending', ?4, 0)
             ON CONFLICT(path) DO UPDATE SET
                 status = 'pending',
                 queued_at = excluded.queued_at,
                 retry_count = 0,
                 error_message = NULL",
            params![path, mod_time, content_hash, Utc::now().to_rfc3339()],
        )?;
        debug!(path, "queued file");
        Ok(())
    }

    /// Re-queue a file after a transient failure, preserving the retry count
    pub fn requeue_file(&self, path: &str, mod_time: i64, content_hash: &str, retry_count: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (path, last_mod_time, content_hash, status, queued_at, retry_count)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                 last_mod_time = excluded.last_mod_time,
                 content_hash = excluded.content_hash,
                 status = 'pending',
                 queued_at = excluded.queued_at,
                 retry_count = excluded.retry_count",
            params![path, mod_time, content_hash, Utc::now().to_rfc3339(), retry_count],
        )?;
        Ok(())
    }

    /// Fetch up to `limit` pending files, FIFO by queue timestamp
    pub fn get_pending_files(&self, limit: i64) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {} FROM files WHERE status = 'pending' ORDER BY queued_at ASC LIMIT ?1",
            FILE_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([limit], row_to_file)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Advisory pending -> processing transition
    pub fn mark_file_processing(&self, file_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE files SET status = 'processing' WHERE id = ?1",
            [file_id],
        )?;
        Ok(())
    }

    /// Successful completion: clear the error and retry counter
    pub fn mark_file_indexed(&self, file_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE files
             SET status = 'indexed', indexed_at = ?1, error_message = NULL, retry_count = 0
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), file_id],
        )?;
        Ok(())
    }

    /// Permanent failure: record the error and final retry count
    pub fn mark_file_failed(&self, file_id: i64, error: &str, retry_count: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE files
             SET status = 'failed', error_message = ?1, retry_count = ?2
             WHERE id = ?3",
            params![error, retry_count, file_id],
        )?;
        Ok(())
    }

    /// Crash recovery: return every row stuck in 'processing' to 'pending'.
    /// Called on startup, before the workers poll.
    pub fn reset_stuck_processing(&self) -> Result<i64> {
        let affected = self.conn().execute(
            "UPDATE files SET status = 'pending' WHERE status = 'processing'",
            [],
        )?;
        if affected > 0 {
            info!(count = affected, "reset stuck processing files to pending");
        }
        Ok(affected as i64)
    }
}
