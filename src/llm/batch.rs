//! Batched extraction protocol
//!
//! The batch prompt enumerates chunks 1..N with their file paths inside
//! Markdown code fences and asks the model for one JSON object per line.
//! The parser strips surrounding fences, tolerates blank and non-JSON
//! lines, and maps each line's 1-based chunk number back to the chunk and
//! file ids it was built from.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ChainsawError, ProviderErrorKind, Result};
use crate::types::{EntityKind, RelationType};

use super::{ChunkInput, EdgeWithMeta, ExtractedEdge};

/// Chunk/file ids behind a 1-based chunk number in the prompt
#[derive(Debug, Clone, Copy)]
pub struct ChunkMeta {
    pub chunk_id: i64,
    pub file_id: i64,
}

/// Build the Markdown-framed batch prompt and the chunk-number mapping
pub fn build_markdown_prompt(chunks: &[ChunkInput]) -> (String, HashMap<usize, ChunkMeta>) {
    let entity_types = EntityKind::all()
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join("|");
    let relations = RelationType::all()
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join("|");

    let mut prompt = format!(
        "You are analyzing source code. Extract relationships between code entities from the chunks below.\n\
         \n\
         For each relationship found, output ONE JSON line with:\n\
         - chunk: which chunk number (1, 2, 3, etc.)\n\
         - source: entity name\n\
         - source_type: {entity_types}\n\
         - target: entity name\n\
         - target_type: {entity_types}\n\
         - relation_type: {relations}\n\
         \n\
         Focus on meaningful relationships. Ignore trivial built-ins (int, string, error).\n\
         \n\
         Output ONLY JSONL format (one JSON object per line). No explanations, no markdown wrappers.\n\
         \n\
         ---\n\n"
    );

    let mut mapping = HashMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let number = i + 1;
        mapping.insert(
            number,
            ChunkMeta {
                chunk_id: chunk.chunk_id,
                file_id: chunk.file_id,
            },
        );

        prompt.push_str(&format!("# Chunk {}\n", number));
        if !chunk.file_path.is_empty() {
            prompt.push_str(&format!("File: `{}`\n\n", chunk.file_path));
        }
        prompt.push_str("```\n");
        prompt.push_str(&chunk.content);
        prompt.push_str("\n```\n\n");
    }

    prompt.push_str("---\n\nOutput:\n");
    (prompt, mapping)
}

#[derive(Debug, Deserialize)]
struct JsonlEdge {
    chunk: usize,
    #[serde(default)]
    source: String,
    #[serde(default)]
    source_type: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    target_type: String,
    #[serde(default)]
    relation_type: String,
}

/// Strip a surrounding Markdown code fence (```json ... ``` or ``` ... ```)
pub fn strip_markdown_code_fence(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // drop the rest of the opening fence line
        let Some(newline) = rest.find('\n') else {
            return s;
        };
        let mut body = &rest[newline + 1..];
        if let Some(stripped) = body.strip_suffix("```") {
            body = stripped;
        }
        return body.trim();
    }
    s
}

/// Parse a JSONL response, attaching chunk and file ids by reverse lookup
/// on the `chunk` field.
///
/// Valid lines among garbage are returned without error; an empty valid
/// set in the presence of parse errors is a structured parse error.
pub fn parse_jsonl(
    response: &str,
    mapping: &HashMap<usize, ChunkMeta>,
) -> Result<Vec<EdgeWithMeta>> {
    let body = strip_markdown_code_fence(response);

    let mut edges = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for (line_no, raw) in body.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('`') {
            continue;
        }
        if !line.starts_with('{') {
            continue;
        }

        let parsed: JsonlEdge = match serde_json::from_str(line) {
            Ok(edge) => edge,
            Err(e) => {
                errors.push(format!("line {}: {}", line_no + 1, e));
                continue;
            }
        };

        let Some(meta) = mapping.get(&parsed.chunk) else {
            errors.push(format!(
                "line {}: invalid chunk number {}",
                line_no + 1,
                parsed.chunk
            ));
            continue;
        };

        edges.push(EdgeWithMeta {
            edge: ExtractedEdge {
                source: parsed.source,
                source_type: parsed.source_type,
                target: parsed.target,
                target_type: parsed.target_type,
                relation_type: parsed.relation_type,
            },
            chunk_id: meta.chunk_id,
            file_id: meta.file_id,
        });
    }

    if edges.is_empty() && !errors.is_empty() {
        let preview = errors
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ChainsawError::provider(
            ProviderErrorKind::Malformed,
            format!("failed to parse JSONL: {}", preview),
        ));
    }

    if !errors.is_empty() {
        debug!(
            parsed = edges.len(),
            skipped = errors.len(),
            "skipped malformed JSONL lines"
        );
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> Vec<ChunkInput> {
        vec![
            ChunkInput {
                chunk_id: 11,
                file_id: 1,
                file_path: "/src/a.rs".into(),
                content: "fn alpha() { beta() }".into(),
            },
            ChunkInput {
                chunk_id: 12,
                file_id: 2,
                file_path: "/src/b.rs".into(),
                content: "struct Beta;".into(),
            },
        ]
    }

    #[test]
    fn test_prompt_enumerates_chunks_with_paths() {
        let (prompt, mapping) = build_markdown_prompt(&inputs());
        assert!(prompt.contains("# Chunk 1"));
        assert!(prompt.contains("# Chunk 2"));
        assert!(prompt.contains("File: `/src/a.rs`"));
        assert!(prompt.contains("fn alpha() { beta() }"));
        assert!(prompt.contains("FUNCTION|METHOD|TYPE"));
        assert!(prompt.contains("calls|uses|imports"));
        assert_eq!(mapping[&1].chunk_id, 11);
        assert_eq!(mapping[&2].file_id, 2);
    }

    #[test]
    fn test_parse_jsonl_maps_chunk_numbers() {
        let (_, mapping) = build_markdown_prompt(&inputs());
        let response = concat!(
            r#"{"chunk":1,"source":"alpha","source_type":"FUNCTION","target":"beta","target_type":"FUNCTION","relation_type":"calls"}"#,
            "\n",
            r#"{"chunk":2,"source":"Beta","source_type":"STRUCT","target":"Display","target_type":"INTERFACE","relation_type":"implements"}"#,
        );

        let edges = parse_jsonl(response, &mapping).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].chunk_id, 11);
        assert_eq!(edges[0].edge.relation_type, "calls");
        assert_eq!(edges[1].chunk_id, 12);
        assert_eq!(edges[1].file_id, 2);
    }

    #[test]
    fn test_parse_jsonl_tolerates_garbage_lines() {
        let (_, mapping) = build_markdown_prompt(&inputs());
        let response = concat!(
            "Here are the relationships I found:\n",
            "\n",
            r#"{"chunk":1,"source":"alpha","source_type":"FUNCTION","target":"beta","target_type":"FUNCTION","relation_type":"calls"}"#,
            "\n",
            "{not json at all\n",
            r#"{"chunk":99,"source":"x","source_type":"TYPE","target":"y","target_type":"TYPE","relation_type":"uses"}"#,
            "\n",
        );

        let edges = parse_jsonl(response, &mapping).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge.source, "alpha");
    }

    #[test]
    fn test_parse_jsonl_strips_code_fence() {
        let (_, mapping) = build_markdown_prompt(&inputs());
        let response = format!(
            "```json\n{}\n```",
            r#"{"chunk":1,"source":"a","source_type":"FUNCTION","target":"b","target_type":"FUNCTION","relation_type":"calls"}"#
        );
        let edges = parse_jsonl(&response, &mapping).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_parse_jsonl_all_garbage_is_error() {
        let (_, mapping) = build_markdown_prompt(&inputs());
        let err = parse_jsonl("{broken\n{also broken", &mapping).unwrap_err();
        assert!(err.to_string().contains("failed to parse JSONL"));
    }

    #[test]
    fn test_parse_jsonl_empty_response_is_empty_ok() {
        let (_, mapping) = build_markdown_prompt(&inputs());
        let edges = parse_jsonl("", &mapping).unwrap();
        assert!(edges.is_empty());
        // prose-only responses with no JSON-looking lines are also fine
        let edges = parse_jsonl("no relationships found", &mapping).unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn test_strip_fence_variants() {
        assert_eq!(strip_markdown_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_markdown_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_markdown_code_fence("{}"), "{}");
        assert_eq!(strip_markdown_code_fence("  {}\n"), "{}");
    }
}
