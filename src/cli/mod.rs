//! CLI command implementations
//!
//! Handles all command-line interface operations:
//! - init: Create the store
//! - index: Queue a path for indexing
//! - search: Semantic similarity search
//! - graph: Cypher-subset queries over the knowledge graph
//! - status / daemon: queue inspection and worker management

mod commands;

pub use commands::*;

/// Output rendering for machine-readable modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Yaml,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(OutputFormat::Text),
            "yaml" => Some(OutputFormat::Yaml),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Pull the value of a `--flag value` pair out of an argument list
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("yaml"), Some(OutputFormat::Yaml));
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("xml"), None);
    }

    #[test]
    fn test_flag_value() {
        let args: Vec<String> = ["search", "query", "--limit", "3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(flag_value(&args, "--limit"), Some("3"));
        assert_eq!(flag_value(&args, "--format"), None);
    }
}
