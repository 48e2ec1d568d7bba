//! SQL generation from the query AST
//!
//! Emits one parameterized SQL statement plus an ordered argument list;
//! arguments are appended in the exact order their placeholders appear.
//!
//! Direction binds first: the underlying edge row always stores the source
//! as e1, so a forward arrow maps the visual source to e1 while a backward
//! arrow maps the visual target to e1. Variables keep following their
//! visual nodes either way.

use rusqlite::types::Value;

use crate::error::{ChainsawError, Result};

use super::ast::{Direction, Query, ReturnItem};

/// Options for SQL generation
#[derive(Debug, Clone, Default)]
pub struct TranspileOptions {
    /// Scope results to this directory: both path columns are matched
    /// against `<cwd>/%`. Empty means no filtering.
    pub cwd: Option<String>,
}

/// Generated SQL and its bind parameters
#[derive(Debug, Clone)]
pub struct TranspileResult {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Variable bindings resolved against the e1/e2 table aliases
struct Bindings {
    e1_var: Option<String>,
    e2_var: Option<String>,
    e1_label: Option<String>,
    e2_label: Option<String>,
}

fn bind_direction(query: &Query) -> Result<Bindings> {
    let source = &query.pattern.source;
    let target = &query.pattern.target;
    match query.pattern.edge.direction {
        Direction::Forward => Ok(Bindings {
            e1_var: source.variable.clone(),
            e1_label: source.label.clone(),
            e2_var: target.variable.clone(),
            e2_label: target.label.clone(),
        }),
        Direction::Backward => Ok(Bindings {
            e1_var: target.variable.clone(),
            e1_label: target.label.clone(),
            e2_var: source.variable.clone(),
            e2_label: source.label.clone(),
        }),
        Direction::Undirected => Err(ChainsawError::Input(
            "undirected edges not yet supported".into(),
        )),
    }
}

impl Bindings {
    /// Map a query variable to its SQL table alias
    fn resolve(&self, variable: &str, context: &str) -> Result<&'static str> {
        if self.e1_var.as_deref() == Some(variable) {
            Ok("e1")
        } else if self.e2_var.as_deref() == Some(variable) {
            Ok("e2")
        } else {
            Err(ChainsawError::Input(format!(
                "unknown variable in {}: {}",
                context, variable
            )))
        }
    }
}

/// Render one non-aggregate select expression, redirecting the magic
/// properties to the joined chunk/file tables
fn property_expr(alias: &'static str, variable: &str, property: &str) -> String {
    let n = &alias[1..]; // e1 -> 1, e2 -> 2
    match property {
        "snippet" => format!("c{}.content_snippet AS {}_snippet", n, variable),
        "file" => format!("f{}.path AS {}_file", n, variable),
        "lines" => format!(
            "(c{}.start_line || '-' || c{}.end_line) AS {}_lines",
            n, n, variable
        ),
        _ => format!("{}.{} AS {}_{}", alias, property, variable, property),
    }
}

fn aggregate_expr(item: &ReturnItem, bindings: &Bindings) -> Result<String> {
    let ReturnItem::Aggregate {
        function,
        variable,
        alias,
    } = item
    else {
        unreachable!("aggregate_expr called on non-aggregate item");
    };

    let table = bindings.resolve(variable, "aggregate")?;
    let mut expr = match function.as_str() {
        "COUNT" => format!("COUNT(DISTINCT {}.id)", table),
        "SUM" | "AVG" | "MIN" | "MAX" => {
            return Err(ChainsawError::Input(format!(
                "aggregate function {} not yet supported",
                function
            )))
        }
        other => {
            return Err(ChainsawError::Input(format!(
                "unknown aggregate function: {}",
                other
            )))
        }
    };
    if let Some(alias) = alias {
        expr.push_str(" AS ");
        expr.push_str(alias);
    }
    Ok(expr)
}

fn select_items(query: &Query, bindings: &Bindings) -> Result<Vec<String>> {
    let mut items = Vec::new();
    for item in &query.return_items {
        match item {
            ReturnItem::Aggregate { .. } => items.push(aggregate_expr(item, bindings)?),
            ReturnItem::Property {
                variable, property, ..
            } => {
                if variable.is_empty() {
                    continue;
                }
                let alias = bindings.resolve(variable, "RETURN")?;
                match property {
                    Some(prop) => items.push(property_expr(alias, variable, prop)),
                    None => items.push(format!("{}.*", alias)),
                }
            }
        }
    }
    Ok(items)
}

fn cwd_pattern(cwd: &str) -> String {
    format!("{}/%", cwd.trim_end_matches('/'))
}

/// Transpile a parsed query. Multi-hop patterns go through a recursive
/// common-table expression; everything else is a flat join.
pub fn generate(query: &Query, opts: &TranspileOptions) -> Result<TranspileResult> {
    if query.pattern.edge.is_multi_hop() {
        generate_multi_hop(query, opts)
    } else {
        generate_single_hop(query, opts)
    }
}

fn generate_single_hop(query: &Query, opts: &TranspileOptions) -> Result<TranspileResult> {
    let bindings = bind_direction(query)?;
    let edge = &query.pattern.edge;

    let mut sql = String::from("SELECT ");
    let mut args: Vec<Value> = Vec::new();

    sql.push_str(&select_items(query, &bindings)?.join(", "));

    sql.push_str("\nFROM entities e1");
    sql.push_str("\nJOIN graph_edges g ON g.source_entity_id = e1.id");
    sql.push_str("\nJOIN entities e2 ON g.target_entity_id = e2.id");
    // unconditional left joins keep magic properties NULL-safe
    sql.push_str("\nLEFT JOIN vec_chunks c1 ON e1.chunk_id = c1.chunk_id");
    sql.push_str("\nLEFT JOIN files f1 ON c1.file_id = f1.id");
    sql.push_str("\nLEFT JOIN vec_chunks c2 ON e2.chunk_id = c2.chunk_id");
    sql.push_str("\nLEFT JOIN files f2 ON c2.file_id = f2.id");

    let mut conditions: Vec<&str> = Vec::new();
    if let Some(cwd) = opts.cwd.as_deref().filter(|c| !c.is_empty()) {
        let pattern = cwd_pattern(cwd);
        conditions.push("(f1.path LIKE ? OR f2.path LIKE ?)");
        args.push(Value::Text(pattern.clone()));
        args.push(Value::Text(pattern));
    }
    if let Some(label) = &bindings.e1_label {
        conditions.push("e1.entity_type = ?");
        args.push(Value::Text(label.clone()));
    }
    if let Some(edge_type) = &edge.edge_type {
        conditions.push("g.relation_type = ?");
        args.push(Value::Text(edge_type.clone()));
    }
    if let Some(label) = &bindings.e2_label {
        conditions.push("e2.entity_type = ?");
        args.push(Value::Text(label.clone()));
    }
    if !conditions.is_empty() {
        sql.push_str("\nWHERE ");
        sql.push_str(&conditions.join("\n  AND "));
    }

    if !query.group_by.is_empty() {
        let mut items = Vec::new();
        for item in &query.group_by {
            let alias = bindings.resolve(&item.variable, "GROUP BY")?;
            items.push(format!("{}.{}", alias, item.property));
        }
        sql.push_str("\nGROUP BY ");
        sql.push_str(&items.join(", "));
    }

    if !query.order_by.is_empty() {
        let items: Vec<String> = query
            .order_by
            .iter()
            .map(|item| {
                format!(
                    "{} {}",
                    item.expression,
                    if item.ascending { "ASC" } else { "DESC" }
                )
            })
            .collect();
        sql.push_str("\nORDER BY ");
        sql.push_str(&items.join(", "));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!("\nLIMIT {}", limit));
    }

    Ok(TranspileResult { sql, args })
}

fn generate_multi_hop(query: &Query, _opts: &TranspileOptions) -> Result<TranspileResult> {
    let bindings = bind_direction(query)?;
    let edge = &query.pattern.edge;

    let mut sql = String::new();
    let mut args: Vec<Value> = Vec::new();

    sql.push_str("WITH RECURSIVE paths(source_id, target_id, depth) AS (\n");

    // base case: direct edges at depth 1
    sql.push_str("  SELECT g.source_entity_id, g.target_entity_id, 1\n");
    sql.push_str("  FROM graph_edges g\n");
    sql.push_str("  JOIN entities e1 ON g.source_entity_id = e1.id\n");
    sql.push_str("  JOIN entities e2 ON g.target_entity_id = e2.id\n");
    sql.push_str("  WHERE 1=1\n");

    if let Some(label) = &bindings.e1_label {
        sql.push_str("    AND e1.entity_type = ?\n");
        args.push(Value::Text(label.clone()));
    }
    if let Some(edge_type) = &edge.edge_type {
        sql.push_str("    AND g.relation_type = ?\n");
        args.push(Value::Text(edge_type.clone()));
    }
    if let Some(label) = &bindings.e2_label {
        sql.push_str("    AND e2.entity_type = ?\n");
        args.push(Value::Text(label.clone()));
    }

    sql.push_str("\n  UNION ALL\n\n");

    // inductive step: extend each path by one edge
    sql.push_str("  SELECT p.source_id, g.target_entity_id, p.depth + 1\n");
    sql.push_str("  FROM paths p\n");
    sql.push_str("  JOIN graph_edges g ON p.target_id = g.source_entity_id\n");

    if let Some(edge_type) = &edge.edge_type {
        sql.push_str("  WHERE g.relation_type = ?\n");
        args.push(Value::Text(edge_type.clone()));
        sql.push_str("    AND p.depth < ?\n");
    } else {
        sql.push_str("  WHERE p.depth < ?\n");
    }
    let max_hops = if edge.max_hops == 0 { 10 } else { edge.max_hops };
    args.push(Value::Integer(max_hops));

    sql.push_str(")\n");

    sql.push_str("SELECT DISTINCT ");
    let items = select_items(query, &bindings)?;
    sql.push_str(&items.join(", "));

    sql.push_str("\nFROM paths p");
    sql.push_str("\nJOIN entities e1 ON p.source_id = e1.id");
    sql.push_str("\nJOIN entities e2 ON p.target_id = e2.id");
    sql.push_str("\nLEFT JOIN vec_chunks c1 ON e1.chunk_id = c1.chunk_id");
    sql.push_str("\nLEFT JOIN files f1 ON c1.file_id = f1.id");
    sql.push_str("\nLEFT JOIN vec_chunks c2 ON e2.chunk_id = c2.chunk_id");
    sql.push_str("\nLEFT JOIN files f2 ON c2.file_id = f2.id");

    if edge.min_hops > 0 {
        sql.push_str("\nWHERE p.depth >= ?");
        args.push(Value::Integer(edge.min_hops));
    }

    Ok(TranspileResult { sql, args })
}
