//! Store module for chainsaw
//!
//! A single embedded SQLite database holds the file registry (which doubles
//! as the durable work queue), the chunk table with its sqlite-vec virtual
//! index, the entity/edge graph, and the per-chunk extraction watermark.
//!
//! Concurrency contract: one write-capable handle is shared process-wide
//! behind a mutex; WAL mode keeps readers from blocking writers at the
//! engine level, and the single handle serializes writes.

mod chunks;
mod files;
mod graph;
pub mod schema;

pub use chunks::GetNeighborsOptions;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, Once};

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{ChainsawError, Result};

/// Registers the sqlite-vec extension for every connection opened after
/// this call. Idempotent.
fn register_sqlite_vec() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init is the extension entry point exported by
        // the sqlite-vec crate, with the init signature sqlite3_auto_extension
        // expects. This is the documented registration pattern.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path
    pub path: PathBuf,
    /// Dimension of embedding vectors (e.g. 384, 768, 1024)
    pub embedding_dim: usize,
    /// Skip creating the vec_chunks virtual table (for tests that do not
    /// exercise vector search)
    pub skip_vec_table: bool,
}

/// Database handle for the hybrid store
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
    embedding_dim: usize,
}

impl Database {
    /// Open or create a database with the given configuration.
    ///
    /// On first creation the schema is installed and meta rows are seeded;
    /// on an existing database the schema version is migrated forward when
    /// additive and the stored embedding dimension is verified against the
    /// requested one. A mismatch is a fatal configuration error.
    pub fn open(cfg: StoreConfig) -> Result<Self> {
        if cfg.embedding_dim == 0 {
            return Err(ChainsawError::Config(
                "embedding dimension must be positive".into(),
            ));
        }

        if let Some(dir) = cfg.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ChainsawError::io("mkdir", dir, e))?;
        }

        let existed = cfg.path.exists();

        register_sqlite_vec();
        let conn = Connection::open(&cfg.path)?;

        let db = Self {
            conn: Mutex::new(conn),
            path: cfg.path.clone(),
            embedding_dim: cfg.embedding_dim,
        };
        db.init_schema(existed, cfg.skip_vec_table)?;
        db.restrict_permissions();

        debug!(path = %db.path.display(), dim = db.embedding_dim, "store opened");
        Ok(db)
    }

    /// In-memory database for tests
    pub fn in_memory(embedding_dim: usize, skip_vec_table: bool) -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
            embedding_dim,
        };
        db.init_schema(false, skip_vec_table)?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection mutex poisoned")
    }

    fn init_schema(&self, existed: bool, skip_vec_table: bool) -> Result<()> {
        let mut conn = self.conn();

        conn.execute_batch(schema::ENABLE_WAL_MODE)?;
        conn.execute_batch(schema::SET_WAL_CHECKPOINT)?;
        conn.execute_batch(schema::ENABLE_FOREIGN_KEYS)?;

        let tx = conn.transaction()?;

        tx.execute_batch(schema::SCHEMA)?;
        if !skip_vec_table {
            tx.execute_batch(&schema::vec_chunks_schema(self.embedding_dim))?;
        }

        if !existed {
            let now = Utc::now().to_rfc3339();
            let dim = self.embedding_dim.to_string();
            for (key, value) in [
                (schema::META_KEY_SCHEMA_VERSION, schema::SCHEMA_VERSION),
                (schema::META_KEY_CREATED_AT, now.as_str()),
                (schema::META_KEY_EMBEDDING_DIM, dim.as_str()),
            ] {
                tx.execute(
                    "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                    rusqlite::params![key, value],
                )?;
            }
        } else {
            let current: Option<String> = tx
                .query_row(
                    "SELECT value FROM meta WHERE key = ?1",
                    [schema::META_KEY_SCHEMA_VERSION],
                    |row| row.get(0),
                )
                .optional()?;

            if current.as_deref() == Some("2.1.0") {
                Self::migrate_queue_columns(&tx)?;
            }

            let stored_dim: Option<String> = tx
                .query_row(
                    "SELECT value FROM meta WHERE key = ?1",
                    [schema::META_KEY_EMBEDDING_DIM],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(stored) = stored_dim {
                if stored != self.embedding_dim.to_string() {
                    return Err(ChainsawError::Config(format!(
                        "embedding dimension mismatch: database has {}, config has {}",
                        stored, self.embedding_dim
                    )));
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Additive migration from 2.1.0: add the work-queue columns and the
    /// status index, then bump the recorded schema version.
    fn migrate_queue_columns(tx: &rusqlite::Transaction) -> Result<()> {
        let has_status: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('files') WHERE name = 'status'",
            [],
            |row| row.get(0),
        )?;
        if has_status == 0 {
            tx.execute_batch(
                "ALTER TABLE files ADD COLUMN status TEXT DEFAULT 'indexed';
                 ALTER TABLE files ADD COLUMN error_message TEXT;
                 ALTER TABLE files ADD COLUMN retry_count INTEGER DEFAULT 0;
                 ALTER TABLE files ADD COLUMN queued_at TEXT;
                 CREATE INDEX IF NOT EXISTS idx_files_status ON files(status, queued_at);",
            )?;
        }
        tx.execute(
            "UPDATE meta SET value = ?1 WHERE key = ?2",
            rusqlite::params![schema::SCHEMA_VERSION, schema::META_KEY_SCHEMA_VERSION],
        )?;
        info!("migrated store schema to {}", schema::SCHEMA_VERSION);
        Ok(())
    }

    /// 0600 on the database and its WAL/shared-memory sidecars
    fn restrict_permissions(&self) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for suffix in ["", "-wal", "-shm"] {
                let mut name = self.path.as_os_str().to_os_string();
                name.push(suffix);
                let sidecar = PathBuf::from(name);
                if sidecar.exists() {
                    if let Err(e) =
                        std::fs::set_permissions(&sidecar, std::fs::Permissions::from_mode(0o600))
                    {
                        warn!(path = %sidecar.display(), error = %e, "failed to restrict permissions");
                    }
                }
            }
        }
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured embedding dimension
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Request a full WAL checkpoint. Called on shutdown; a checkpoint
    /// failure is logged by the caller, not fatal.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Verify connectivity, schema version, and WAL mode
    pub fn health_check(&self) -> Result<()> {
        let version = self.get_meta(schema::META_KEY_SCHEMA_VERSION)?;
        if version != schema::SCHEMA_VERSION {
            return Err(ChainsawError::Config(format!(
                "schema version mismatch: expected {}, got {}",
                schema::SCHEMA_VERSION,
                version
            )));
        }

        // In-memory databases report journal_mode=memory; only enforce WAL
        // for on-disk stores.
        if self.path != Path::new(":memory:") {
            let mode: String = self
                .conn()
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            if mode != "wal" {
                return Err(ChainsawError::Config(format!(
                    "WAL mode not enabled, got: {}",
                    mode
                )));
            }
        }
        Ok(())
    }

    /// Fetch a meta value; missing keys are a configuration error
    pub fn get_meta(&self, key: &str) -> Result<String> {
        let value: Option<String> = self
            .conn()
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        value.ok_or_else(|| ChainsawError::Config(format!("meta key not found: {}", key)))
    }

    /// Store a meta key/value pair
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// Execute a parameterized SQL statement and return column names plus
    /// all rows. Used only by the Cypher execution path.
    pub fn raw_query(&self, sql: &str, params: &[Value]) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let n = columns.len();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(n);
            for i in 0..n {
                record.push(row.get::<_, Value>(i)?);
            }
            out.push(record);
        }
        Ok((columns, out))
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.path == Path::new(":memory:") {
            return;
        }
        if let Ok(conn) = self.conn.lock() {
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                warn!(error = %e, "failed to checkpoint WAL on close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_seeded_on_create() {
        let db = Database::in_memory(8, true).unwrap();
        assert_eq!(
            db.get_meta(schema::META_KEY_SCHEMA_VERSION).unwrap(),
            schema::SCHEMA_VERSION
        );
        assert_eq!(db.get_meta(schema::META_KEY_EMBEDDING_DIM).unwrap(), "8");
        assert!(db.get_meta(schema::META_KEY_CREATED_AT).is_ok());
    }

    #[test]
    fn test_set_meta_overwrites() {
        let db = Database::in_memory(8, true).unwrap();
        db.set_meta("last_indexed", "2024-01-01T00:00:00Z").unwrap();
        db.set_meta("last_indexed", "2024-06-01T00:00:00Z").unwrap();
        assert_eq!(db.get_meta("last_indexed").unwrap(), "2024-06-01T00:00:00Z");
    }

    #[test]
    fn test_missing_meta_key_is_config_error() {
        let db = Database::in_memory(8, true).unwrap();
        let err = db.get_meta("nope").unwrap_err();
        assert!(matches!(err, ChainsawError::Config(_)));
    }

    #[test]
    fn test_raw_query_returns_columns_and_rows() {
        let db = Database::in_memory(8, true).unwrap();
        db.set_meta("a", "1").unwrap();
        let (cols, rows) = db
            .raw_query(
                "SELECT key, value FROM meta WHERE key = ?1",
                &[Value::Text("a".into())],
            )
            .unwrap();
        assert_eq!(cols, vec!["key".to_string(), "value".to_string()]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Value::Text("1".into()));
    }
}
