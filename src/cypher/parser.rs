//! Recursive-descent parser for the Cypher subset
//!
//! Grammar:
//!
//! ```text
//! query      := MATCH pattern RETURN items [GROUP BY group] [ORDER BY order] [LIMIT INT]
//! pattern    := node edge node
//! node       := '(' [IDENT] [':' IDENT] ')'
//! edge       := '-' '[' body ']' ('->' | '-')  |  '<-' '[' body ']' '-'
//! body       := [':' IDENT] ['*' [INT] ['..' [INT]]]
//! items      := item (',' item)*
//! item       := AGG '(' IDENT ')' [AS IDENT] | IDENT ['.' IDENT] [AS IDENT]
//! ```

use crate::error::{ChainsawError, Result};

use super::ast::{
    Direction, EdgePattern, GroupByItem, NodePattern, OrderByItem, PathPattern, Query, ReturnItem,
};
use super::lexer::{Token, TokenKind};

const AGGREGATE_FUNCTIONS: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];

const DEFAULT_MIN_HOPS: i64 = 1;
const DEFAULT_MAX_HOPS: i64 = 10;

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Query> {
        self.expect_keyword("MATCH")?;
        let pattern = self.parse_pattern()?;
        self.expect_keyword("RETURN")?;
        let return_items = self.parse_return_items()?;

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            group_by = self.parse_group_by_items()?;
        }

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            order_by = self.parse_order_by_items()?;
        }

        let mut limit = None;
        if self.eat_keyword("LIMIT") {
            let token = self.expect(TokenKind::Int)?;
            limit = Some(token.text.parse::<i64>().map_err(|_| {
                ChainsawError::Query {
                    message: format!("invalid LIMIT value '{}'", token.text),
                    position: token.pos,
                }
            })?);
        }

        let trailing = self.peek();
        if trailing.kind != TokenKind::Eof {
            return Err(self.unexpected(trailing, "end of query"));
        }

        Ok(Query {
            pattern,
            return_items,
            group_by,
            order_by,
            limit,
        })
    }

    fn parse_pattern(&mut self) -> Result<PathPattern> {
        let source = self.parse_node()?;
        let edge = self.parse_edge()?;
        let target = self.parse_node()?;
        Ok(PathPattern {
            source,
            edge,
            target,
        })
    }

    fn parse_node(&mut self) -> Result<NodePattern> {
        self.expect(TokenKind::LParen)?;
        let mut node = NodePattern::default();

        if self.peek().kind == TokenKind::Ident {
            node.variable = Some(self.advance().text.clone());
        }
        if self.peek().kind == TokenKind::Colon {
            self.advance();
            node.label = Some(self.expect(TokenKind::Ident)?.text.clone());
        }

        self.expect(TokenKind::RParen)?;
        Ok(node)
    }

    fn parse_edge(&mut self) -> Result<EdgePattern> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Dash => {
                self.advance();
                let (edge_type, min_hops, max_hops) = self.parse_edge_body()?;
                let direction = match self.peek().kind {
                    TokenKind::Arrow => {
                        self.advance();
                        Direction::Forward
                    }
                    TokenKind::Dash => {
                        self.advance();
                        Direction::Undirected
                    }
                    _ => {
                        let t = self.peek();
                        return Err(self.unexpected(t, "'->' or '-'"));
                    }
                };
                Ok(EdgePattern {
                    edge_type,
                    direction,
                    min_hops,
                    max_hops,
                })
            }
            TokenKind::LArrow => {
                self.advance();
                let (edge_type, min_hops, max_hops) = self.parse_edge_body()?;
                self.expect(TokenKind::Dash)?;
                Ok(EdgePattern {
                    edge_type,
                    direction: Direction::Backward,
                    min_hops,
                    max_hops,
                })
            }
            _ => Err(self.unexpected(&token, "edge pattern")),
        }
    }

    /// `'[' [':' IDENT] ['*' [INT] ['..' [INT]]] ']'`
    fn parse_edge_body(&mut self) -> Result<(Option<String>, i64, i64)> {
        self.expect(TokenKind::LBracket)?;

        let mut edge_type = None;
        if self.peek().kind == TokenKind::Colon {
            self.advance();
            edge_type = Some(self.expect(TokenKind::Ident)?.text.clone());
        }

        let mut min_hops = 0;
        let mut max_hops = 0;
        if self.peek().kind == TokenKind::Star {
            self.advance();
            min_hops = DEFAULT_MIN_HOPS;
            max_hops = DEFAULT_MAX_HOPS;

            if self.peek().kind == TokenKind::Int {
                let token = self.advance();
                min_hops = parse_int(token)?;
                // a single bound like *2 means exactly that many hops
                max_hops = min_hops;
            }
            if self.peek().kind == TokenKind::DotDot {
                self.advance();
                max_hops = DEFAULT_MAX_HOPS;
                if self.peek().kind == TokenKind::Int {
                    let token = self.advance();
                    max_hops = parse_int(token)?;
                }
            }
        }

        self.expect(TokenKind::RBracket)?;
        Ok((edge_type, min_hops, max_hops))
    }

    fn parse_return_items(&mut self) -> Result<Vec<ReturnItem>> {
        let mut items = vec![self.parse_return_item()?];
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            items.push(self.parse_return_item()?);
        }
        Ok(items)
    }

    fn parse_return_item(&mut self) -> Result<ReturnItem> {
        let name = self.expect(TokenKind::Ident)?.text.clone();

        let is_aggregate = AGGREGATE_FUNCTIONS
            .iter()
            .any(|f| name.eq_ignore_ascii_case(f))
            && self.peek().kind == TokenKind::LParen;

        if is_aggregate {
            self.advance(); // '('
            let variable = self.expect(TokenKind::Ident)?.text.clone();
            self.expect(TokenKind::RParen)?;
            let alias = self.parse_alias()?;
            return Ok(ReturnItem::Aggregate {
                function: name.to_ascii_uppercase(),
                variable,
                alias,
            });
        }

        let mut property = None;
        if self.peek().kind == TokenKind::Dot {
            self.advance();
            property = Some(self.expect(TokenKind::Ident)?.text.clone());
        }
        let alias = self.parse_alias()?;

        Ok(ReturnItem::Property {
            variable: name,
            property,
            alias,
        })
    }

    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.eat_keyword("AS") {
            Ok(Some(self.expect(TokenKind::Ident)?.text.clone()))
        } else {
            Ok(None)
        }
    }

    fn parse_group_by_items(&mut self) -> Result<Vec<GroupByItem>> {
        let mut items = vec![self.parse_group_by_item()?];
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            items.push(self.parse_group_by_item()?);
        }
        Ok(items)
    }

    fn parse_group_by_item(&mut self) -> Result<GroupByItem> {
        let variable = self.expect(TokenKind::Ident)?.text.clone();
        self.expect(TokenKind::Dot)?;
        let property = self.expect(TokenKind::Ident)?.text.clone();
        Ok(GroupByItem { variable, property })
    }

    fn parse_order_by_items(&mut self) -> Result<Vec<OrderByItem>> {
        let mut items = vec![self.parse_order_by_item()?];
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            items.push(self.parse_order_by_item()?);
        }
        Ok(items)
    }

    fn parse_order_by_item(&mut self) -> Result<OrderByItem> {
        let mut expression = self.expect(TokenKind::Ident)?.text.clone();
        if self.peek().kind == TokenKind::Dot {
            self.advance();
            let property = self.expect(TokenKind::Ident)?.text.clone();
            expression = format!("{}.{}", expression, property);
        }

        let mut ascending = true;
        if self.eat_keyword("DESC") {
            ascending = false;
        } else {
            self.eat_keyword("ASC");
        }

        Ok(OrderByItem {
            expression,
            ascending,
        })
    }

    // token plumbing

    fn peek(&self) -> &'a Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &'a Token {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'a Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            let token = self.peek().clone();
            Err(self.unexpected(&token, &format!("{:?}", kind)))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            let token = self.peek().clone();
            Err(self.unexpected(&token, keyword))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let token = self.peek();
        if token.kind == TokenKind::Ident && token.text.eq_ignore_ascii_case(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, token: &Token, expected: &str) -> ChainsawError {
        let got = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("'{}'", token.text)
        };
        ChainsawError::Query {
            message: format!("expected {}, got {}", expected, got),
            position: token.pos,
        }
    }
}

fn parse_int(token: &Token) -> Result<i64> {
    token.text.parse::<i64>().map_err(|_| ChainsawError::Query {
        message: format!("invalid integer '{}'", token.text),
        position: token.pos,
    })
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse(input: &str) -> Result<Query> {
        let tokens = tokenize(input)?;
        Parser::new(&tokens).parse()
    }

    #[test]
    fn test_basic_forward_pattern() {
        let q = parse("MATCH (f:FUNCTION)-[:calls]->(t:FUNCTION) RETURN f.name, t.name").unwrap();
        assert_eq!(q.pattern.source.variable.as_deref(), Some("f"));
        assert_eq!(q.pattern.source.label.as_deref(), Some("FUNCTION"));
        assert_eq!(q.pattern.edge.edge_type.as_deref(), Some("calls"));
        assert_eq!(q.pattern.edge.direction, Direction::Forward);
        assert!(!q.pattern.edge.is_multi_hop());
        assert_eq!(q.return_items.len(), 2);
    }

    #[test]
    fn test_backward_pattern() {
        let q = parse("MATCH (i:INTERFACE)<-[:implements]-(s:STRUCT) RETURN i.name").unwrap();
        assert_eq!(q.pattern.edge.direction, Direction::Backward);
        assert_eq!(q.pattern.source.variable.as_deref(), Some("i"));
        assert_eq!(q.pattern.target.variable.as_deref(), Some("s"));
    }

    #[test]
    fn test_undirected_pattern_parses() {
        let q = parse("MATCH (a)-[:uses]-(b) RETURN a.name").unwrap();
        assert_eq!(q.pattern.edge.direction, Direction::Undirected);
    }

    #[test]
    fn test_anonymous_and_unlabeled_nodes() {
        let q = parse("MATCH (p:PACKAGE)-[:imports]->(t) RETURN p.name, t.name").unwrap();
        assert_eq!(q.pattern.target.variable.as_deref(), Some("t"));
        assert!(q.pattern.target.label.is_none());
    }

    #[test]
    fn test_hop_range_forms() {
        let q = parse("MATCH (a)-[:calls*1..3]->(b) RETURN a.name").unwrap();
        assert_eq!((q.pattern.edge.min_hops, q.pattern.edge.max_hops), (1, 3));

        let q = parse("MATCH (a)-[:uses*2]->(b) RETURN a.name").unwrap();
        assert_eq!((q.pattern.edge.min_hops, q.pattern.edge.max_hops), (2, 2));

        let q = parse("MATCH (a)-[*1..5]->(b) RETURN a.name").unwrap();
        assert!(q.pattern.edge.edge_type.is_none());
        assert_eq!((q.pattern.edge.min_hops, q.pattern.edge.max_hops), (1, 5));

        let q = parse("MATCH (a)-[:calls*2..]->(b) RETURN a.name").unwrap();
        assert_eq!((q.pattern.edge.min_hops, q.pattern.edge.max_hops), (2, 10));
    }

    #[test]
    fn test_aggregate_with_alias() {
        let q = parse("MATCH (a)-[:calls]->(b) RETURN b.name, COUNT(a) AS callers GROUP BY b.name")
            .unwrap();
        assert_eq!(q.return_items.len(), 2);
        match &q.return_items[1] {
            ReturnItem::Aggregate {
                function,
                variable,
                alias,
            } => {
                assert_eq!(function, "COUNT");
                assert_eq!(variable, "a");
                assert_eq!(alias.as_deref(), Some("callers"));
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
        assert_eq!(q.group_by.len(), 1);
        assert_eq!(q.group_by[0].property, "name");
    }

    #[test]
    fn test_order_by_and_limit() {
        let q = parse(
            "MATCH (a)-[:calls]->(b) RETURN b.name, COUNT(a) AS callers \
             GROUP BY b.name ORDER BY callers DESC LIMIT 10",
        )
        .unwrap();
        assert_eq!(q.order_by.len(), 1);
        assert_eq!(q.order_by[0].expression, "callers");
        assert!(!q.order_by[0].ascending);
        assert_eq!(q.limit, Some(10));
    }

    #[test]
    fn test_order_by_defaults_to_ascending() {
        let q = parse("MATCH (a)-[:calls]->(b) RETURN a.name ORDER BY a.name").unwrap();
        assert!(q.order_by[0].ascending);
        assert_eq!(q.order_by[0].expression, "a.name");
    }

    #[test]
    fn test_parse_error_reports_token_and_position() {
        let err = parse("MATCH (a)-[:calls]->(b) RETURN").unwrap_err();
        match err {
            ChainsawError::Query { message, .. } => {
                assert!(message.contains("end of input"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = parse("FETCH (a) RETURN a").unwrap_err();
        match err {
            ChainsawError::Query { message, position } => {
                assert!(message.contains("MATCH"));
                assert_eq!(position, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(parse("MATCH (a)-[:x]->(b) RETURN a.name extra").is_err());
    }
}
