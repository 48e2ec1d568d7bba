//! AST for the Cypher subset
//!
//! A query is exactly `MATCH pathPattern RETURN returnList` with optional
//! GROUP BY, ORDER BY, and LIMIT clauses. The path pattern is a single
//! node-edge-node triple; edges are directed and may carry a hop range.

/// A complete parsed query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub pattern: PathPattern,
    pub return_items: Vec<ReturnItem>,
    pub group_by: Vec<GroupByItem>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<i64>,
}

/// `node edge node`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pub source: NodePattern,
    pub edge: EdgePattern,
    pub target: NodePattern,
}

/// `( [var] [: LABEL] )`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodePattern {
    pub variable: Option<String>,
    /// Entity-type filter
    pub label: Option<String>,
}

/// Visual direction of the arrow in the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Undirected,
}

/// `-[:TYPE]->`, `<-[:TYPE]-`, or the variable-length `-[:TYPE*min..max]->`
/// form. Hop bounds of zero mean "single hop"; when either bound is given
/// the other defaults (min 1, max 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgePattern {
    /// Relation-type filter
    pub edge_type: Option<String>,
    pub direction: Direction,
    pub min_hops: i64,
    pub max_hops: i64,
}

impl EdgePattern {
    /// True when the pattern requests variable-length expansion
    pub fn is_multi_hop(&self) -> bool {
        self.min_hops > 0 || self.max_hops > 0
    }
}

/// One item of the RETURN list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnItem {
    /// `var` or `var.prop`, optionally aliased
    Property {
        variable: String,
        property: Option<String>,
        alias: Option<String>,
    },
    /// `AGG(var)`, optionally aliased. Only COUNT is implemented; the
    /// other aggregate names parse but are rejected at SQL generation.
    Aggregate {
        function: String,
        variable: String,
        alias: Option<String>,
    },
}

/// `var.prop` in a GROUP BY list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupByItem {
    pub variable: String,
    pub property: String,
}

/// An ORDER BY expression: a SELECT alias or a qualified column, emitted
/// verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByItem {
    pub expression: String,
    pub ascending: bool,
}
