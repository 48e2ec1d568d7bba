//! Core type definitions for chainsaw
//!
//! Defines the fundamental types shared across the store and pipeline:
//! - FileRecord: a tracked file with its work-queue state
//! - Chunk: a line-aligned slice of a file with one embedding attached
//! - Entity / EntityEdge: the symbolic knowledge graph
//! - Vocabularies: file status, entity kinds, relation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a file in the work queue.
///
/// The queue is the `files.status = 'pending'` projection of the registry;
/// transitions are monotone within an indexing attempt and reset only by
/// crash recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Indexed => "indexed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "indexed" => Some(FileStatus::Indexed),
            "failed" => Some(FileStatus::Failed),
            _ => None,
        }
    }
}

/// Kinds of code entities the extractor recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Function,
    Method,
    Type,
    Interface,
    Struct,
    Variable,
    Constant,
    Package,
    Test,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "FUNCTION",
            EntityKind::Method => "METHOD",
            EntityKind::Type => "TYPE",
            EntityKind::Interface => "INTERFACE",
            EntityKind::Struct => "STRUCT",
            EntityKind::Variable => "VARIABLE",
            EntityKind::Constant => "CONSTANT",
            EntityKind::Package => "PACKAGE",
            EntityKind::Test => "TEST",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FUNCTION" => Some(EntityKind::Function),
            "METHOD" => Some(EntityKind::Method),
            "TYPE" => Some(EntityKind::Type),
            "INTERFACE" => Some(EntityKind::Interface),
            "STRUCT" => Some(EntityKind::Struct),
            "VARIABLE" => Some(EntityKind::Variable),
            "CONSTANT" => Some(EntityKind::Constant),
            "PACKAGE" => Some(EntityKind::Package),
            "TEST" => Some(EntityKind::Test),
            _ => None,
        }
    }

    /// The full vocabulary, in prompt order
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Function,
            EntityKind::Method,
            EntityKind::Type,
            EntityKind::Interface,
            EntityKind::Struct,
            EntityKind::Variable,
            EntityKind::Constant,
            EntityKind::Package,
            EntityKind::Test,
        ]
    }
}

/// Recognized relation types between entities.
///
/// Edges store the relation as a free-form short string; this enum is the
/// vocabulary advertised to the extraction model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Calls,
    Uses,
    Imports,
    Implements,
    Extends,
    Defines,
    References,
    Creates,
    Returns,
    Accepts,
    HasField,
    Tests,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Calls => "calls",
            RelationType::Uses => "uses",
            RelationType::Imports => "imports",
            RelationType::Implements => "implements",
            RelationType::Extends => "extends",
            RelationType::Defines => "defines",
            RelationType::References => "references",
            RelationType::Creates => "creates",
            RelationType::Returns => "returns",
            RelationType::Accepts => "accepts",
            RelationType::HasField => "has_field",
            RelationType::Tests => "tests",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(RelationType::Calls),
            "uses" => Some(RelationType::Uses),
            "imports" => Some(RelationType::Imports),
            "implements" => Some(RelationType::Implements),
            "extends" => Some(RelationType::Extends),
            "defines" => Some(RelationType::Defines),
            "references" => Some(RelationType::References),
            "creates" => Some(RelationType::Creates),
            "returns" => Some(RelationType::Returns),
            "accepts" => Some(RelationType::Accepts),
            "has_field" => Some(RelationType::HasField),
            "tests" => Some(RelationType::Tests),
            _ => None,
        }
    }

    pub fn all() -> &'static [RelationType] {
        &[
            RelationType::Calls,
            RelationType::Uses,
            RelationType::Imports,
            RelationType::Implements,
            RelationType::Extends,
            RelationType::Defines,
            RelationType::References,
            RelationType::Creates,
            RelationType::Returns,
            RelationType::Accepts,
            RelationType::HasField,
            RelationType::Tests,
        ]
    }
}

/// A tracked file in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Unique absolute path
    pub path: String,
    /// Last modification time, seconds since the epoch
    pub last_mod_time: i64,
    /// SHA-256 of the content, lowercase hex
    pub content_hash: String,
    pub indexed_at: Option<DateTime<Utc>>,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub queued_at: Option<DateTime<Utc>>,
}

/// A stored chunk: a line-aligned slice of a file.
///
/// The embedding lives only in the vector index; re-indexing a file deletes
/// its chunks and inserts new ones, so chunk ids are never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: i64,
    pub file_id: i64,
    pub content_snippet: String,
    /// 1-based, inclusive
    pub start_line: i64,
    pub end_line: i64,
}

/// A chunk joined with its file path, for bulk export to the graph worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkWithPath {
    pub chunk_id: i64,
    pub file_id: i64,
    pub file_path: String,
    pub content_snippet: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// A named symbol extracted from a specific chunk.
///
/// Uniqueness is (name, entity_type, chunk_id); the same name in a
/// different chunk is a distinct entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub entity_type: String,
    pub chunk_id: i64,
}

/// A directed, typed relation between two entities, attributed to the
/// chunk that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEdge {
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub relation_type: String,
    pub chunk_id: i64,
    /// In [0, 1], default 1.0
    pub weight: f64,
}

/// A chunk ranked by cosine distance to a query embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine distance; lower is more similar
    pub distance: f64,
    pub file_path: String,
    /// Graph-connected chunks, when the expanded search variant is used
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub related: Vec<RelatedChunk>,
}

/// A chunk reached through the legacy chunk-to-chunk adjacency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedChunk {
    pub chunk: Chunk,
    pub relation_type: String,
    pub weight: f64,
    pub depth: i64,
}

/// Counters reported by `extraction_stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total: i64,
    pub extracted: i64,
    pub pending: i64,
}
