//! Context-injection block format
//!
//! The CLI can inject a comment-delimited context block into downstream
//! tool prompts: it carries a UUID, the query, ranked file/score pairs,
//! derived graph relations, and optional skill-pack references. The
//! delimiters are strict literals so the companion clean operation can
//! excise the block atomically.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::SearchResult;

pub const CONTEXT_START: &str = "CHAINSAW_CONTEXT_START";
pub const CONTEXT_END: &str = "CHAINSAW_CONTEXT_END";

/// A ranked file reference inside the block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileScore {
    pub path: String,
    pub score: f64,
}

/// One derived relation, e.g. `parse_config -calls-> load_yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub relation_type: String,
    pub target: String,
}

/// The injectable context payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlock {
    pub id: String,
    pub query: String,
    pub files: Vec<FileScore>,
    pub relations: Vec<Relation>,
    pub skill_packs: Vec<String>,
}

impl ContextBlock {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            files: Vec::new(),
            relations: Vec::new(),
            skill_packs: Vec::new(),
        }
    }

    /// Populate the file list from search results
    pub fn with_results(mut self, results: &[SearchResult]) -> Self {
        self.files = results
            .iter()
            .map(|r| FileScore {
                path: r.file_path.clone(),
                score: r.score,
            })
            .collect();
        self
    }

    /// Render the block with the given line-comment prefix (`//`, `#`, ...)
    pub fn render(&self, comment_prefix: &str) -> String {
        let mut out = String::new();
        let line = |out: &mut String, body: &str| {
            out.push_str(comment_prefix);
            out.push(' ');
            out.push_str(body);
            out.push('\n');
        };

        line(&mut out, &format!("{} id={}", CONTEXT_START, self.id));
        line(&mut out, &format!("query: {}", self.query));
        for file in &self.files {
            line(
                &mut out,
                &format!("file: {} score={:.4}", file.path, file.score),
            );
        }
        for relation in &self.relations {
            line(
                &mut out,
                &format!(
                    "relation: {} -{}-> {}",
                    relation.source, relation.relation_type, relation.target
                ),
            );
        }
        for pack in &self.skill_packs {
            line(&mut out, &format!("skill-pack: {}", pack));
        }
        line(&mut out, CONTEXT_END);
        out
    }
}

/// Excise every well-formed context block from `content`. Returns the
/// cleaned text and the number of blocks removed. An unterminated block
/// is left in place rather than truncating the document.
pub fn clean(content: &str) -> (String, usize) {
    let mut out = String::with_capacity(content.len());
    let mut removed = 0usize;
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.contains(CONTEXT_START) {
            // look ahead for the closing delimiter
            let mut block: Vec<&str> = vec![line];
            let mut terminated = false;
            for inner in lines.by_ref() {
                block.push(inner);
                if inner.contains(CONTEXT_END) {
                    terminated = true;
                    break;
                }
            }
            if terminated {
                removed += 1;
            } else {
                for kept in block {
                    out.push_str(kept);
                    out.push('\n');
                }
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }

    if !content.ends_with('\n') && out.ends_with('\n') {
        out.pop();
    }
    (out, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_delimiters_and_payload() {
        let mut block = ContextBlock::new("error handling");
        block.files.push(FileScore {
            path: "/p/src/errors.rs".into(),
            score: 0.8321,
        });
        block.relations.push(Relation {
            source: "handle".into(),
            relation_type: "calls".into(),
            target: "log_error".into(),
        });
        block.skill_packs.push("rust-errors@1".into());

        let text = block.render("//");
        assert!(text.starts_with(&format!("// {} id={}", CONTEXT_START, block.id)));
        assert!(text.contains("// query: error handling"));
        assert!(text.contains("// file: /p/src/errors.rs score=0.8321"));
        assert!(text.contains("// relation: handle -calls-> log_error"));
        assert!(text.contains("// skill-pack: rust-errors@1"));
        assert!(text.trim_end().ends_with(CONTEXT_END));
    }

    #[test]
    fn test_clean_round_trip() {
        let block = ContextBlock::new("find parser").render("//");
        let doc = format!("fn before() {{}}\n{}fn after() {{}}\n", block);

        let (cleaned, removed) = clean(&doc);
        assert_eq!(removed, 1);
        assert_eq!(cleaned, "fn before() {}\nfn after() {}\n");
    }

    #[test]
    fn test_clean_removes_multiple_blocks() {
        let a = ContextBlock::new("one").render("#");
        let b = ContextBlock::new("two").render("#");
        let doc = format!("x = 1\n{}y = 2\n{}z = 3\n", a, b);

        let (cleaned, removed) = clean(&doc);
        assert_eq!(removed, 2);
        assert_eq!(cleaned, "x = 1\ny = 2\nz = 3\n");
    }

    #[test]
    fn test_clean_preserves_unterminated_block() {
        let doc = format!("code\n// {} id=xyz\n// query: dangling\n", CONTEXT_START);
        let (cleaned, removed) = clean(&doc);
        assert_eq!(removed, 0);
        assert_eq!(cleaned, doc);
    }

    #[test]
    fn test_clean_without_blocks_is_identity() {
        let doc = "fn main() {}\n";
        let (cleaned, removed) = clean(doc);
        assert_eq!(removed, 0);
        assert_eq!(cleaned, doc);
    }
}
