//! chainsaw: hybrid semantic + knowledge-graph code index
//!
//! Indexes a local source corpus into a single SQLite store combining
//! dense chunk embeddings (sqlite-vec) with a symbolic entity/edge graph,
//! then serves two query modalities over it:
//!
//! - semantic similarity search (nearest-neighbor on embeddings)
//! - graph pattern search in a Cypher subset, transpiled to SQL
//!
//! ## Architecture
//!
//! - `db`: the hybrid store: file registry (doubling as the durable work
//!   queue), vector-indexed chunks, entities, edges, and the per-chunk
//!   extraction watermark, all under WAL
//! - `pipeline`: admission plus two polling workers: embedding first,
//!   graph extraction second, decoupled by the watermark
//! - `cypher`: the Cypher-subset to SQL transpiler
//! - `llm`: embedding and graph-extraction provider adapters
//! - `watcher`: debounced filesystem-event adapter feeding admission
//! - `filter`: include/exclude and blacklist/whitelist admission control

pub mod chunker;
pub mod cli;
pub mod config;
pub mod context;
pub mod cypher;
pub mod db;
pub mod error;
pub mod filter;
pub mod llm;
pub mod pipeline;
pub mod search;
pub mod types;
pub mod watcher;

pub use error::{ChainsawError, Result};

/// Crate version, mirrored into `chainsaw version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
