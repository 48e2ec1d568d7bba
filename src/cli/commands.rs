//! Command implementations for CLI operations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use tracing::{info, warn};

use crate::chunker::ChunkerConfig;
use crate::config::{self, GlobalConfig, MergedConfig, DEFAULT_EMBEDDING_DIM};
use crate::cypher::{self, TranspileOptions};
use crate::db::{schema, Database, StoreConfig};
use crate::filter::IngestFilter;
use crate::llm::ollama::{OllamaClient, OllamaConfig};
use crate::llm::openai::{OpenAiClient, OpenAiConfig};
use crate::llm::GraphExtractor;
use crate::pipeline::embed_worker::{EmbedWorker, EmbedWorkerConfig};
use crate::pipeline::graph_worker::{GraphWorker, GraphWorkerConfig};
use crate::pipeline::{queue_path, queue_tree, Indexer, IndexerConfig};
use crate::search::{path_prefix_pattern, SearchConfig, SearchEngine};
use crate::types::FileStatus;

use super::OutputFormat;

const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(300);

fn open_default_store() -> Result<Arc<Database>> {
    let path = config::database_path()?;
    let db = Database::open(StoreConfig {
        path,
        embedding_dim: DEFAULT_EMBEDDING_DIM,
        skip_vec_table: false,
    })?;
    Ok(Arc::new(db))
}

fn load_config() -> GlobalConfig {
    match config::config_path().and_then(|p| GlobalConfig::load(&p)) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "config not found, using defaults");
            GlobalConfig::default_config()
        }
    }
}

fn ingest_filter(merged: &MergedConfig) -> IngestFilter {
    IngestFilter::new(
        &merged.include,
        &merged.exclude,
        &merged.blacklist,
        &merged.whitelist,
    )
}

// embeddings always go to the local provider
fn embedding_client() -> Result<Arc<OllamaClient>> {
    let client = OllamaClient::new(OllamaConfig {
        timeout: EXTRACTION_TIMEOUT,
        ..OllamaConfig::default()
    })?;
    Ok(Arc::new(client))
}

/// Pick the graph-extraction adapter: explicit provider wins, otherwise
/// OpenAI-style base URLs select the chat-completions client.
fn graph_client(merged: &MergedConfig) -> Result<Arc<dyn GraphExtractor>> {
    let mut provider = merged.llm_provider.to_lowercase();
    if provider.is_empty() && !merged.llm_base_url.is_empty() {
        let url = merged.llm_base_url.to_lowercase();
        if url.contains("openrouter") || url.contains("openai") {
            provider = "openai".to_string();
        }
    }

    if provider == "openai" {
        let client = OpenAiClient::new(OpenAiConfig {
            base_url: merged.llm_base_url.clone(),
            api_key: merged.llm_api_key.clone(),
            timeout: EXTRACTION_TIMEOUT,
        })?;
        info!(base_url = %merged.llm_base_url, "using OpenAI-compatible API for graph extraction");
        Ok(Arc::new(client))
    } else {
        let base_url = if merged.llm_base_url.is_empty() {
            OllamaConfig::default().base_url
        } else {
            merged.llm_base_url.clone()
        };
        let client = OllamaClient::new(OllamaConfig {
            base_url,
            timeout: EXTRACTION_TIMEOUT,
            api_key: None,
        })?;
        info!("using local provider for graph extraction");
        Ok(Arc::new(client))
    }
}

fn indexer_config(merged: &MergedConfig) -> IndexerConfig {
    let mut cfg = IndexerConfig::default();
    if !merged.embedding_model.is_empty() {
        cfg.embed_model = merged.embedding_model.clone();
    }
    if merged.chunk_size > 0 {
        cfg.chunker = ChunkerConfig {
            chunk_size: merged.chunk_size,
            overlap: merged.overlap,
            ..cfg.chunker
        };
    }
    if let Some(driver) = &merged.graph_driver {
        if !driver.model.is_empty() {
            cfg.graph_model = driver.model.clone();
        }
        if driver.batch_size > 0 {
            cfg.graph_batch_size = driver.batch_size;
        }
    }
    cfg
}

/// `chainsaw init`
pub fn init_command() -> Result<()> {
    let db_path = config::database_path()?;
    if db_path.exists() {
        println!("Database already exists at {}", db_path.display());
        return Ok(());
    }

    let db = Database::open(StoreConfig {
        path: db_path.clone(),
        embedding_dim: DEFAULT_EMBEDDING_DIM,
        skip_vec_table: false,
    })?;
    drop(db);

    println!("Database initialized at {}", db_path.display());
    println!("Embedding dimension: {}", DEFAULT_EMBEDDING_DIM);
    Ok(())
}

/// `chainsaw index <path>`: queue files; the daemon drains the queue
pub fn index_command(path: &str) -> Result<()> {
    let db = open_default_store()?;

    let target = std::fs::canonicalize(path)
        .with_context(|| format!("cannot resolve path {}", path))?;

    // a project-local .config.yaml may narrow the scope further
    let local_path = if target.is_dir() {
        target.join(".config.yaml")
    } else {
        target.with_file_name(".config.yaml")
    };
    let local = if local_path.exists() {
        Some(crate::config::LocalConfig::load(&local_path)?)
    } else {
        None
    };
    let local_dir = local_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| target.clone());

    let merged =
        load_config().merge_local(local.as_ref().map(|l| (l, local_dir.as_path())))?;
    let filter = ingest_filter(&merged);

    println!("Queueing for indexing: {}", target.display());
    let start = std::time::Instant::now();

    if target.is_dir() {
        let stats = queue_tree(&db, &filter, &target);
        println!(
            "Queued {} files in {:.2?} ({} filtered, {} errors)",
            stats.queued,
            start.elapsed(),
            stats.skipped,
            stats.errors
        );
    } else {
        let queued = queue_path(&db, &filter, &target)?;
        if queued {
            println!("Queued in {:.2?}", start.elapsed());
        } else {
            println!("Skipped (filtered)");
        }
    }

    println!("\nFiles queued for indexing. The daemon will process them in the background.");
    println!("Check progress with: chainsaw status");
    Ok(())
}

/// `chainsaw search <query> [--limit N] [--format yaml|json]`
pub async fn search_command(query: &str, limit: i64, format: OutputFormat) -> Result<()> {
    let db = open_default_store()?;
    let merged = load_config().merge_local(None)?;
    let engine = SearchEngine::new(
        Arc::clone(&db),
        embedding_client()?,
        SearchConfig {
            embed_model: if merged.embedding_model.is_empty() {
                SearchConfig::default().embed_model
            } else {
                merged.embedding_model.clone()
            },
        },
    );

    // results are scoped to the current directory and its subtree
    let scope = std::env::current_dir()
        .ok()
        .map(|cwd| path_prefix_pattern(&cwd.to_string_lossy()));

    match format {
        OutputFormat::Json => {
            let results = engine.vector_search(query, limit, scope.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Yaml => {
            let results = engine.vector_search(query, limit, scope.as_deref()).await?;
            print!("{}", serde_yaml::to_string(&results)?);
        }
        OutputFormat::Text => {
            let hits = engine
                .expanded_search(query, limit, 1, scope.as_deref())
                .await?;
            if hits.is_empty() {
                println!("No results found");
                return Ok(());
            }
            println!("# Search Results\n");
            println!("**Query:** `{}`\n", query);
            println!("**Found {} results**\n", hits.len());
            for (i, hit) in hits.iter().enumerate() {
                println!("---\n");
                println!(
                    "## {}/{}. {}\n",
                    i + 1,
                    hits.len(),
                    Path::new(&hit.file_path)
                        .file_name()
                        .map(|n| n.to_string_lossy())
                        .unwrap_or_default()
                );
                println!(
                    "**File:** `{}` | **Lines:** {}-{} | **Distance:** {:.4}\n",
                    hit.file_path, hit.chunk.start_line, hit.chunk.end_line, hit.distance
                );
                let mut snippet = hit.chunk.content_snippet.clone();
                if !snippet.ends_with('\n') {
                    snippet.push('\n');
                }
                println!("```\n{}```\n", snippet);

                if !hit.related.is_empty() {
                    println!("### Related Chunks\n");
                    for (j, related) in hit.related.iter().enumerate() {
                        println!(
                            "#### {}/{}: chunk {} ({}) - Lines {}-{}\n",
                            j + 1,
                            hit.related.len(),
                            related.chunk.chunk_id,
                            related.relation_type,
                            related.chunk.start_line,
                            related.chunk.end_line,
                        );
                        let mut snippet = related.chunk.content_snippet.clone();
                        if !snippet.ends_with('\n') {
                            snippet.push('\n');
                        }
                        println!("```\n{}```\n", snippet);
                    }
                }
            }
        }
    }
    Ok(())
}

/// `chainsaw context inject <query>`: emit a context block for
/// downstream tools
pub async fn context_inject_command(query: &str, limit: i64) -> Result<()> {
    let db = open_default_store()?;
    let merged = load_config().merge_local(None)?;
    let engine = SearchEngine::new(
        Arc::clone(&db),
        embedding_client()?,
        SearchConfig {
            embed_model: if merged.embedding_model.is_empty() {
                SearchConfig::default().embed_model
            } else {
                merged.embedding_model.clone()
            },
        },
    );

    let scope = std::env::current_dir()
        .ok()
        .map(|cwd| path_prefix_pattern(&cwd.to_string_lossy()));
    let results = engine.vector_search(query, limit, scope.as_deref()).await?;

    let block = crate::context::ContextBlock::new(query).with_results(&results);
    print!("{}", block.render("//"));
    Ok(())
}

/// `chainsaw context clean <file>`: excise injected blocks in place
pub fn context_clean_command(path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path))?;
    let (cleaned, removed) = crate::context::clean(&content);
    if removed > 0 {
        std::fs::write(path, cleaned).with_context(|| format!("cannot write {}", path))?;
    }
    println!("Removed {} context block(s) from {}", removed, path);
    Ok(())
}

fn row_value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Value::from(*f),
        Value::Text(s) => serde_json::Value::from(s.clone()),
        Value::Blob(b) => serde_json::Value::from(String::from_utf8_lossy(b).into_owned()),
    }
}

/// `chainsaw graph query <cypher> [--format yaml|json]`
pub fn graph_query_command(cypher_query: &str, format: OutputFormat) -> Result<()> {
    let db = open_default_store()?;

    let cwd = std::env::current_dir()
        .ok()
        .map(|p| p.to_string_lossy().into_owned());

    let transpiled = cypher::transpile(cypher_query, &TranspileOptions { cwd })?;
    let (columns, rows) = db
        .raw_query(&transpiled.sql, &transpiled.args)
        .with_context(|| format!("executing generated SQL:\n{}", transpiled.sql))?;

    let records: Vec<serde_json::Map<String, serde_json::Value>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .zip(row.iter())
                .map(|(col, value)| (col.clone(), row_value_to_json(value)))
                .collect()
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "query": cypher_query,
                    "results": records,
                    "total": records.len(),
                }))?
            );
        }
        // YAML is the default; it reads better in downstream prompts
        _ => {
            println!("query: {:?}", cypher_query);
            if records.is_empty() {
                println!("results: []");
                return Ok(());
            }
            println!("results:");
            for (idx, record) in records.iter().enumerate() {
                println!("  - index: {}", idx);
                for col in &columns {
                    let value = &record[col.as_str()];
                    match value {
                        serde_json::Value::String(s) if s.contains('\n') => {
                            println!("    {}: |", col);
                            for line in s.lines() {
                                println!("      {}", line);
                            }
                        }
                        serde_json::Value::String(s) => println!("    {}: {}", col, s),
                        serde_json::Value::Null => println!("    {}: NULL", col),
                        other => println!("    {}: {}", col, other),
                    }
                }
            }
            println!("\ntotal: {}", records.len());
        }
    }
    Ok(())
}

/// `chainsaw status`
pub fn status_command() -> Result<()> {
    let db = open_default_store()?;

    let files = db.count_files()?;
    let chunks = db.count_chunks()?;
    let edges = db.count_edges()?;
    let by_status = db.count_files_by_status()?;
    let extraction = db.extraction_stats()?;

    println!("Chainsaw Status");
    println!("===============");
    println!("Database:       {}", db.path().display());
    println!();
    println!("Files:");
    println!("  Total:      {}", files);
    for (status, label) in [
        (FileStatus::Indexed, "Indexed"),
        (FileStatus::Pending, "Pending"),
        (FileStatus::Processing, "Processing"),
        (FileStatus::Failed, "Failed"),
    ] {
        if let Some((_, count)) = by_status.iter().find(|(s, _)| *s == status) {
            if *count > 0 {
                println!("  {:<11}{}", format!("{}:", label), count);
            }
        }
    }
    println!();
    println!("Chunks:         {}", chunks);
    println!("Graph edges:    {}", edges);
    println!(
        "Extraction:     {}/{} chunks ({} pending)",
        extraction.extracted, extraction.total, extraction.pending
    );
    println!("Embedding dim:  {}", db.embedding_dim());
    Ok(())
}

/// `chainsaw daemon status`
pub fn daemon_status_command() -> Result<()> {
    let db = open_default_store()?;
    db.health_check()?;

    let files = db.count_files()?;
    let chunks = db.count_chunks()?;
    let edges = db.count_edges()?;
    let by_status = db.count_files_by_status()?;

    println!("Chainsaw Daemon Status");
    println!("======================");
    println!("Database: {}", db.path().display());
    println!();
    println!("Files:");
    println!("  Total:      {}", files);
    for (status, count) in &by_status {
        if *count > 0 {
            println!("  {:<11}{}", format!("{}:", status.as_str()), count);
        }
    }
    println!();
    println!("Chunks:       {}", chunks);
    println!("Graph edges:  {}", edges);
    println!();
    println!("Embedding dim:  {}", db.embedding_dim());
    println!(
        "Schema version: {}",
        db.get_meta(schema::META_KEY_SCHEMA_VERSION)?
    );
    Ok(())
}

/// Every directory under an include root, for watcher subscription
fn directories_under(root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .build();
    for entry in walker.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.into_path());
        }
    }
    dirs
}

/// `chainsaw daemon start`
pub async fn daemon_start_command() -> Result<()> {
    println!("Starting chainsaw daemon...");

    let db = open_default_store()?;
    db.health_check()?;
    println!("Database ready at {}", db.path().display());

    let merged = load_config().merge_local(None)?;
    let filter = Arc::new(ingest_filter(&merged));

    let embedder = embedding_client()?;
    let extractor = graph_client(&merged)?;

    if let Err(e) = embedder.ping().await {
        warn!(error = %e, "embedding provider not reachable; indexing will fail until it is up");
    } else {
        println!("Embedding provider connected");
    }

    let indexer = Arc::new(Indexer::new(
        indexer_config(&merged),
        Arc::clone(&db),
        embedder.clone(),
        extractor,
    ));

    // crash recovery happens before the first worker poll
    db.reset_stuck_processing()?;

    let cancel = tokio_util::sync::CancellationToken::new();

    let embed_worker = EmbedWorker::new(Arc::clone(&indexer), EmbedWorkerConfig::default());
    let embed_cancel = cancel.clone();
    let embed_task = tokio::spawn(async move { embed_worker.run(embed_cancel).await });

    let graph_worker = GraphWorker::new(Arc::clone(&indexer), GraphWorkerConfig::default());
    let graph_cancel = cancel.clone();
    let graph_task = tokio::spawn(async move { graph_worker.run(graph_cancel).await });

    // filesystem events feed the same admission path as `index`
    let watch_db = Arc::clone(&db);
    let watch_filter = Arc::clone(&filter);
    let on_change: Arc<dyn Fn(PathBuf) + Send + Sync> = Arc::new(move |path: PathBuf| {
        match queue_path(&watch_db, &watch_filter, &path) {
            Ok(true) => info!(path = %path.display(), "queued changed file"),
            Ok(false) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to queue changed file"),
        }
    });

    let mut watcher =
        crate::watcher::FileWatcher::new(crate::watcher::WatcherConfig::default(), on_change)?;

    let mut watched = 0usize;
    for include in &merged.include {
        let root = match std::fs::canonicalize(include) {
            Ok(root) => root,
            Err(e) => {
                warn!(path = %include, error = %e, "skipping invalid include path");
                continue;
            }
        };
        // subscribe every directory under the root; the backend watch is
        // per-directory
        for dir in directories_under(&root) {
            match watcher.watch(&dir) {
                Ok(()) => watched += 1,
                Err(e) => warn!(path = %dir.display(), error = %e, "failed to watch directory"),
            }
        }
    }
    if watched == 0 {
        warn!("no directories being watched; update config.yaml with include paths");
    } else {
        println!("Watching {} directories", watched);
    }

    let watch_cancel = cancel.clone();
    let watch_task = tokio::spawn(async move { watcher.run(watch_cancel).await });

    println!();
    println!("Daemon running. Press Ctrl+C to stop.");

    let mut status_ticker = tokio::time::interval(Duration::from_secs(30));
    status_ticker.tick().await; // first tick fires immediately
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down gracefully...");
                break;
            }
            _ = status_ticker.tick() => {
                let files = db.count_files().unwrap_or(0);
                let chunks = db.count_chunks().unwrap_or(0);
                let edges = db.count_edges().unwrap_or(0);
                info!(files, chunks, edges, "daemon status");
            }
        }
    }

    cancel.cancel();
    let _ = embed_task.await;
    let _ = graph_task.await;
    let _ = watch_task.await;

    if let Err(e) = db.checkpoint() {
        warn!(error = %e, "failed to checkpoint store on shutdown");
    }
    Ok(())
}
