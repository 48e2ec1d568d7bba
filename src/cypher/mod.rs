//! Cypher-subset transpiler
//!
//! Parses a restricted Cypher dialect (single path pattern, directed
//! edges, optional variable-length hops, COUNT aggregation, GROUP BY,
//! ORDER BY, LIMIT) and emits one parameterized SQL statement against the
//! hybrid store. Multi-hop patterns become a recursive common-table
//! expression over the edge table.

pub mod ast;
mod lexer;
mod parser;
mod sqlgen;

pub use sqlgen::{TranspileOptions, TranspileResult};

use crate::error::Result;

/// Transpile a Cypher query to SQL with prepared-statement placeholders.
/// Arguments appear in the result list in placeholder order.
pub fn transpile(query: &str, opts: &TranspileOptions) -> Result<TranspileResult> {
    let tokens = lexer::tokenize(query)?;
    let parsed = parser::Parser::new(&tokens).parse()?;
    sqlgen::generate(&parsed, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainsawError;
    use rusqlite::types::Value;

    fn texts(args: &[Value]) -> Vec<String> {
        args.iter()
            .map(|v| match v {
                Value::Text(s) => s.clone(),
                Value::Integer(i) => i.to_string(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_basic_forward_relation() {
        let result = transpile(
            "MATCH (f:FUNCTION)-[:calls]->(t:FUNCTION) RETURN f.name, t.name",
            &TranspileOptions::default(),
        )
        .unwrap();

        let want = "SELECT e1.name AS f_name, e2.name AS t_name\n\
                    FROM entities e1\n\
                    JOIN graph_edges g ON g.source_entity_id = e1.id\n\
                    JOIN entities e2 ON g.target_entity_id = e2.id\n\
                    LEFT JOIN vec_chunks c1 ON e1.chunk_id = c1.chunk_id\n\
                    LEFT JOIN files f1 ON c1.file_id = f1.id\n\
                    LEFT JOIN vec_chunks c2 ON e2.chunk_id = c2.chunk_id\n\
                    LEFT JOIN files f2 ON c2.file_id = f2.id\n\
                    WHERE e1.entity_type = ?\n  \
                      AND g.relation_type = ?\n  \
                      AND e2.entity_type = ?";
        assert_eq!(result.sql, want);
        assert_eq!(texts(&result.args), vec!["FUNCTION", "calls", "FUNCTION"]);
    }

    #[test]
    fn test_wildcard_target_drops_label_filter() {
        let result = transpile(
            "MATCH (p:PACKAGE)-[:imports]->(t) RETURN p.name, t.name",
            &TranspileOptions::default(),
        )
        .unwrap();
        assert!(result.sql.contains("e1.entity_type = ?"));
        assert!(result.sql.contains("g.relation_type = ?"));
        assert!(!result.sql.contains("e2.entity_type"));
        assert_eq!(texts(&result.args), vec!["PACKAGE", "imports"]);
    }

    #[test]
    fn test_backward_relation_binds_visual_direction() {
        let result = transpile(
            "MATCH (i:INTERFACE)<-[:implements]-(s:STRUCT) RETURN i.name, s.name",
            &TranspileOptions::default(),
        )
        .unwrap();

        // visually-left `i` is the edge target, so it resolves to e2
        assert!(result.sql.starts_with("SELECT e2.name AS i_name, e1.name AS s_name"));
        assert_eq!(
            texts(&result.args),
            vec!["STRUCT", "implements", "INTERFACE"]
        );
    }

    #[test]
    fn test_cwd_filter_binds_prefix_twice_first() {
        let result = transpile(
            "MATCH (f:FUNCTION)-[:calls]->(t) RETURN f.name, t.name",
            &TranspileOptions {
                cwd: Some("/home/user/project/pkg/db".into()),
            },
        )
        .unwrap();

        assert!(result
            .sql
            .contains("WHERE (f1.path LIKE ? OR f2.path LIKE ?)\n  AND e1.entity_type = ?"));
        assert_eq!(
            texts(&result.args),
            vec![
                "/home/user/project/pkg/db/%",
                "/home/user/project/pkg/db/%",
                "FUNCTION",
                "calls"
            ]
        );
    }

    #[test]
    fn test_count_with_group_by() {
        let result = transpile(
            "MATCH (a)-[:calls]->(b) RETURN b.name, COUNT(a) AS callers GROUP BY b.name",
            &TranspileOptions::default(),
        )
        .unwrap();

        assert!(result
            .sql
            .starts_with("SELECT e2.name AS b_name, COUNT(DISTINCT e1.id) AS callers"));
        assert!(result.sql.ends_with("GROUP BY e2.name"));
        assert_eq!(texts(&result.args), vec!["calls"]);
    }

    #[test]
    fn test_count_with_order_by_and_limit() {
        let result = transpile(
            "MATCH (a)-[:calls]->(b) RETURN b.name, COUNT(a) AS callers \
             GROUP BY b.name ORDER BY callers DESC LIMIT 10",
            &TranspileOptions::default(),
        )
        .unwrap();

        assert!(result.sql.contains("GROUP BY e2.name\nORDER BY callers DESC\nLIMIT 10"));
        assert_eq!(texts(&result.args), vec!["calls"]);
    }

    #[test]
    fn test_magic_properties_resolve_to_joined_tables() {
        let result = transpile(
            "MATCH (f:FUNCTION)-[:calls]->(t) RETURN f.snippet, t.file, t.lines",
            &TranspileOptions::default(),
        )
        .unwrap();

        assert!(result.sql.contains("c1.content_snippet AS f_snippet"));
        assert!(result.sql.contains("f2.path AS t_file"));
        assert!(result
            .sql
            .contains("(c2.start_line || '-' || c2.end_line) AS t_lines"));
    }

    #[test]
    fn test_entity_type_is_a_plain_column() {
        let result = transpile(
            "MATCH (f:FUNCTION)-[:calls]->(t) RETURN t.entity_type",
            &TranspileOptions::default(),
        )
        .unwrap();
        assert!(result.sql.contains("e2.entity_type AS t_entity_type"));
    }

    #[test]
    fn test_bare_variable_selects_all_columns() {
        let result = transpile(
            "MATCH (f:FUNCTION)-[:calls]->(t) RETURN f",
            &TranspileOptions::default(),
        )
        .unwrap();
        assert!(result.sql.starts_with("SELECT e1.*"));
    }

    #[test]
    fn test_multi_hop_emits_recursive_cte() {
        let result = transpile(
            "MATCH (a)-[:calls*1..3]->(b) RETURN a.name, b.name",
            &TranspileOptions::default(),
        )
        .unwrap();

        assert!(result.sql.starts_with("WITH RECURSIVE paths(source_id, target_id, depth) AS ("));
        assert!(result.sql.contains("UNION ALL"));
        assert!(result.sql.contains("SELECT DISTINCT e1.name AS a_name, e2.name AS b_name"));
        assert!(result.sql.contains("JOIN graph_edges g ON p.target_id = g.source_entity_id"));
        assert!(result.sql.contains("p.depth < ?"));
        assert!(result.sql.ends_with("WHERE p.depth >= ?"));
        // args: relation (base), relation (inductive), max depth, min depth
        assert_eq!(texts(&result.args), vec!["calls", "calls", "3", "1"]);
    }

    #[test]
    fn test_multi_hop_without_type_filters_depth_only() {
        let result = transpile(
            "MATCH (a)-[*1..5]->(b) RETURN a.name, b.name",
            &TranspileOptions::default(),
        )
        .unwrap();
        assert!(result.sql.contains("  WHERE p.depth < ?\n"));
        assert_eq!(texts(&result.args), vec!["5", "1"]);
    }

    #[test]
    fn test_undirected_edge_is_structured_error() {
        let err = transpile(
            "MATCH (a)-[:calls]-(b) RETURN a.name",
            &TranspileOptions::default(),
        )
        .unwrap_err();
        match err {
            ChainsawError::Input(message) => assert!(message.contains("undirected")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_return_variable_is_structured_error() {
        let err = transpile(
            "MATCH (a)-[:calls]->(b) RETURN z.name",
            &TranspileOptions::default(),
        )
        .unwrap_err();
        match err {
            ChainsawError::Input(message) => {
                assert!(message.contains("unknown variable"));
                assert!(message.contains("z"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reserved_aggregates_report_unsupported() {
        let err = transpile(
            "MATCH (a)-[:calls]->(b) RETURN SUM(a)",
            &TranspileOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not yet supported"));
    }

    #[test]
    fn test_argument_order_follows_placeholder_order() {
        let result = transpile(
            "MATCH (f:FUNCTION)-[:calls]->(t:TYPE) RETURN f.name",
            &TranspileOptions {
                cwd: Some("/p".into()),
            },
        )
        .unwrap();
        assert_eq!(
            texts(&result.args),
            vec!["/p/%", "/p/%", "FUNCTION", "calls", "TYPE"]
        );
    }
}
