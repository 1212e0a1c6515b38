//! Recursive-descent parser for the Cypher subset.

use super::lexer::{Token, TokenKind, tokenize};
use crate::{Error, Result};

/// A parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherQuery {
    /// One or more MATCH path patterns, cross-joined.
    pub matches: Vec<PathPattern>,
    /// Optional WHERE predicate.
    pub where_clause: Option<Expr>,
    /// RETURN projection.
    pub return_items: ReturnItems,
    /// ORDER BY keys, applied in sequence.
    pub order_by: Vec<OrderBy>,
    /// LIMIT row cap.
    pub limit: Option<usize>,
}

/// One path: a start node and zero or more relationship/node steps.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    /// The anchoring node pattern.
    pub start: NodePattern,
    /// Each hop: a relationship pattern into the next node pattern.
    pub steps: Vec<(RelPattern, NodePattern)>,
}

/// `(v:Label {key: value})`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    /// Binding variable, if named.
    pub variable: Option<String>,
    /// Label filter (an entity type tag).
    pub label: Option<String>,
    /// Property equality filters.
    pub properties: Vec<(String, Literal)>,
}

/// `-[v:TYPE*min..max]->`, `<-[...]-`, or plain `--`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    /// Binding variable, if named (accepted, not projectable).
    pub variable: Option<String>,
    /// Relationship type filter.
    pub rel_type: Option<String>,
    /// Minimum hops (default 1).
    pub min_hops: u32,
    /// Maximum hops (default 1).
    pub max_hops: u32,
}

impl Default for RelPattern {
    fn default() -> Self {
        Self {
            variable: None,
            rel_type: None,
            min_hops: 1,
            max_hops: 1,
        }
    }
}

/// RETURN projection.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnItems {
    /// `RETURN *`
    Star,
    /// An explicit item list.
    Items(Vec<ReturnItem>),
}

/// One projected item, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    /// The projected value.
    pub value: ValueRef,
    /// `AS alias`, when given.
    pub alias: Option<String>,
}

impl ReturnItem {
    /// Column name: the alias, or the textual form of the reference.
    #[must_use]
    pub fn column_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.value.to_text())
    }
}

/// A variable or dotted property access.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRef {
    /// A bound node variable.
    Variable(String),
    /// `variable.property`
    Property(String, String),
}

impl ValueRef {
    fn to_text(&self) -> String {
        match self {
            Self::Variable(v) => v.clone(),
            Self::Property(v, p) => format!("{v}.{p}"),
        }
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// The sort key.
    pub value: ValueRef,
    /// DESC when true.
    pub descending: bool,
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// String literal.
    Str(String),
    /// Numeric literal.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// NULL.
    Null,
    /// `[a, b, c]` for IN.
    List(Vec<Literal>),
}

/// A WHERE expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// A comparison between two operands.
    Compare {
        /// Left operand.
        lhs: Operand,
        /// Comparison operator.
        op: CompareOp,
        /// Right operand.
        rhs: Operand,
    },
}

/// A comparison operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A variable or property reference.
    Ref(ValueRef),
    /// A literal value.
    Literal(Literal),
}

/// Comparison operators of the subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `CONTAINS`
    Contains,
    /// `STARTS WITH`
    StartsWith,
    /// `ENDS WITH`
    EndsWith,
    /// `IN`
    In,
}

/// Parses a query string.
///
/// # Errors
///
/// Returns [`Error::CypherParse`] with the byte position of the offending
/// token.
pub fn parse(input: &str) -> Result<CypherQuery> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        input_len: input.len(),
    };
    parser.parse_query()
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    input_len: usize,
}

impl Parser {
    fn parse_query(&mut self) -> Result<CypherQuery> {
        let mut matches = Vec::new();
        self.expect_keyword("MATCH")?;
        matches.push(self.parse_path()?);
        while self.eat_keyword("MATCH") || self.eat(&TokenKind::Comma) {
            matches.push(self.parse_path()?);
        }

        let where_clause = if self.eat_keyword("WHERE") {
            Some(self.parse_or()?)
        } else {
            None
        };

        self.expect_keyword("RETURN")?;
        let return_items = self.parse_return_items()?;

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let value = self.parse_value_ref()?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderBy { value, descending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword("LIMIT") {
            match self.next_kind()? {
                TokenKind::Number(n) if n >= 0.0 => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let count = n as usize;
                    Some(count)
                },
                _ => return Err(self.error_at_prev("expected a non-negative LIMIT count")),
            }
        } else {
            None
        };

        if self.index < self.tokens.len() {
            return Err(self.error_here("unexpected trailing input"));
        }

        Ok(CypherQuery {
            matches,
            where_clause,
            return_items,
            order_by,
            limit,
        })
    }

    fn parse_path(&mut self) -> Result<PathPattern> {
        let start = self.parse_node()?;
        let mut steps = Vec::new();
        loop {
            let Some(rel) = self.parse_rel_opt()? else {
                break;
            };
            let node = self.parse_node()?;
            steps.push((rel, node));
        }
        Ok(PathPattern { start, steps })
    }

    fn parse_node(&mut self) -> Result<NodePattern> {
        self.expect(&TokenKind::LParen)?;
        let mut node = NodePattern::default();

        if let Some(TokenKind::Ident(name)) = self.peek_kind() {
            let name = name.clone();
            self.index += 1;
            node.variable = Some(name);
        }
        if self.eat(&TokenKind::Colon) {
            node.label = Some(self.expect_ident("a node label")?);
        }
        if self.eat(&TokenKind::LBrace) {
            node.properties = self.parse_property_map()?;
        }

        self.expect(&TokenKind::RParen)?;
        Ok(node)
    }

    /// Parses the relationship between two nodes, or `None` when the path
    /// ends. Both `-[...]->` and bare `--`/`<--` forms are accepted.
    fn parse_rel_opt(&mut self) -> Result<Option<RelPattern>> {
        if !(self.eat(&TokenKind::Dash) || self.eat(&TokenKind::LeftArrow)) {
            return Ok(None);
        }

        let mut rel = RelPattern::default();
        if self.eat(&TokenKind::LBracket) {
            if let Some(TokenKind::Ident(name)) = self.peek_kind() {
                let name = name.clone();
                self.index += 1;
                rel.variable = Some(name);
            }
            if self.eat(&TokenKind::Colon) {
                rel.rel_type = Some(self.expect_ident("a relationship type")?);
            }
            if self.eat(&TokenKind::Star) {
                rel.min_hops = 1;
                // A bare '*' is capped; unbounded expansion over a personal
                // graph degenerates into a full scan.
                rel.max_hops = 10;
                if let Some(TokenKind::Number(n)) = self.peek_kind() {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let min = *n as u32;
                    self.index += 1;
                    rel.min_hops = min;
                    rel.max_hops = min;
                    if self.eat(&TokenKind::DotDot) {
                        match self.next_kind()? {
                            TokenKind::Number(max) => {
                                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                                {
                                    rel.max_hops = max as u32;
                                }
                            },
                            _ => return Err(self.error_at_prev("expected a hop upper bound")),
                        }
                    }
                }
            }
            if self.eat(&TokenKind::LBrace) {
                // Property filters on relationships parse but are advisory.
                let _ = self.parse_property_map()?;
            }
            self.expect(&TokenKind::RBracket)?;
        }

        // Closing dash / arrow.
        if !(self.eat(&TokenKind::Arrow) || self.eat(&TokenKind::Dash)) {
            return Err(self.error_here("expected '-' or '->' after relationship"));
        }
        Ok(Some(rel))
    }

    fn parse_property_map(&mut self) -> Result<Vec<(String, Literal)>> {
        let mut properties = Vec::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(properties);
        }
        loop {
            let key = self.expect_ident("a property name")?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_literal()?;
            properties.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(properties)
    }

    fn parse_return_items(&mut self) -> Result<ReturnItems> {
        if self.eat(&TokenKind::Star) {
            return Ok(ReturnItems::Star);
        }
        let mut items = Vec::new();
        loop {
            let value = self.parse_value_ref()?;
            let alias = if self.eat_keyword("AS") {
                Some(self.expect_ident("an alias")?)
            } else {
                None
            };
            items.push(ReturnItem { value, alias });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(ReturnItems::Items(items))
    }

    fn parse_value_ref(&mut self) -> Result<ValueRef> {
        let variable = self.expect_ident("a variable")?;
        if self.eat(&TokenKind::Dot) {
            let property = self.expect_ident("a property name")?;
            Ok(ValueRef::Property(variable, property))
        } else {
            Ok(ValueRef::Variable(variable))
        }
    }

    // ------------------------------------------------------------------
    // WHERE expressions: OR < AND < NOT < comparison
    // ------------------------------------------------------------------

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("OR") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("AND") {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        if self.peek_kind() == Some(&TokenKind::LParen) {
            // Distinguish a parenthesized expression from nothing else:
            // inside WHERE, '(' always opens an expression.
            self.index += 1;
            let inner = self.parse_or()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_operand()?;
        let op = self.parse_compare_op()?;
        let rhs = self.parse_operand()?;
        Ok(Expr::Compare { lhs, op, rhs })
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp> {
        if self.eat(&TokenKind::Eq) {
            return Ok(CompareOp::Eq);
        }
        if self.eat(&TokenKind::Ne) {
            return Ok(CompareOp::Ne);
        }
        if self.eat(&TokenKind::Le) {
            return Ok(CompareOp::Le);
        }
        if self.eat(&TokenKind::Ge) {
            return Ok(CompareOp::Ge);
        }
        if self.eat(&TokenKind::Lt) {
            return Ok(CompareOp::Lt);
        }
        if self.eat(&TokenKind::Gt) {
            return Ok(CompareOp::Gt);
        }
        if self.eat_keyword("CONTAINS") {
            return Ok(CompareOp::Contains);
        }
        if self.eat_keyword("STARTS") {
            self.expect_keyword("WITH")?;
            return Ok(CompareOp::StartsWith);
        }
        if self.eat_keyword("ENDS") {
            self.expect_keyword("WITH")?;
            return Ok(CompareOp::EndsWith);
        }
        if self.eat_keyword("IN") {
            return Ok(CompareOp::In);
        }
        Err(self.error_here("expected a comparison operator"))
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        let is_reference = matches!(
            self.peek_kind(),
            Some(TokenKind::Ident(word)) if !is_literal_keyword(word)
        );
        if is_reference {
            Ok(Operand::Ref(self.parse_value_ref()?))
        } else {
            Ok(Operand::Literal(self.parse_literal()?))
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        if self.eat(&TokenKind::LBracket) {
            let mut items = Vec::new();
            if !self.eat(&TokenKind::RBracket) {
                loop {
                    items.push(self.parse_literal()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
            }
            return Ok(Literal::List(items));
        }

        match self.next_kind()? {
            TokenKind::Str(s) => Ok(Literal::Str(s)),
            TokenKind::Number(n) => Ok(Literal::Number(n)),
            TokenKind::Ident(word) if word.eq_ignore_ascii_case("true") => {
                Ok(Literal::Bool(true))
            },
            TokenKind::Ident(word) if word.eq_ignore_ascii_case("false") => {
                Ok(Literal::Bool(false))
            },
            TokenKind::Ident(word) if word.eq_ignore_ascii_case("null") => Ok(Literal::Null),
            _ => Err(self.error_at_prev("expected a literal value")),
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.index).map(|t| &t.kind)
    }

    fn next_kind(&mut self) -> Result<TokenKind> {
        let token = self.tokens.get(self.index).ok_or(Error::CypherParse {
            position: self.input_len,
            message: "unexpected end of query".to_string(),
        })?;
        self.index += 1;
        Ok(token.kind.clone())
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if let Some(TokenKind::Ident(word)) = self.peek_kind() {
            if word.eq_ignore_ascii_case(keyword) {
                self.index += 1;
                return true;
            }
        }
        false
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected {kind:?}")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected {keyword}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek_kind() {
            Some(TokenKind::Ident(word)) => {
                let word = word.clone();
                self.index += 1;
                Ok(word)
            },
            _ => Err(self.error_here(&format!("expected {what}"))),
        }
    }

    fn error_here(&self, message: &str) -> Error {
        let position = self
            .tokens
            .get(self.index)
            .map_or(self.input_len, |t| t.position);
        Error::CypherParse {
            position,
            message: message.to_string(),
        }
    }

    fn error_at_prev(&self, message: &str) -> Error {
        let position = self
            .tokens
            .get(self.index.saturating_sub(1))
            .map_or(self.input_len, |t| t.position);
        Error::CypherParse {
            position,
            message: message.to_string(),
        }
    }
}

fn is_literal_keyword(word: &str) -> bool {
    word.eq_ignore_ascii_case("true")
        || word.eq_ignore_ascii_case("false")
        || word.eq_ignore_ascii_case("null")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_node() {
        let query = parse("MATCH (p:PERSON) RETURN p").unwrap();
        assert_eq!(query.matches.len(), 1);
        let start = &query.matches[0].start;
        assert_eq!(start.variable.as_deref(), Some("p"));
        assert_eq!(start.label.as_deref(), Some("PERSON"));
    }

    #[test]
    fn test_parse_path_with_hops() {
        let query = parse("MATCH (p:PERSON)-[r:KNOWS*1..3]->(q:PERSON) RETURN q").unwrap();
        let (rel, node) = &query.matches[0].steps[0];
        assert_eq!(rel.rel_type.as_deref(), Some("KNOWS"));
        assert_eq!(rel.min_hops, 1);
        assert_eq!(rel.max_hops, 3);
        assert_eq!(node.label.as_deref(), Some("PERSON"));
    }

    #[test]
    fn test_parse_properties() {
        let query = parse("MATCH (p:PERSON {name: 'Ada', active: true}) RETURN p").unwrap();
        let props = &query.matches[0].start.properties;
        assert_eq!(props.len(), 2);
        assert_eq!(props[0], ("name".to_string(), Literal::Str("Ada".to_string())));
        assert_eq!(props[1], ("active".to_string(), Literal::Bool(true)));
    }

    #[test]
    fn test_parse_where_precedence() {
        let query =
            parse("MATCH (p) WHERE NOT p.name = 'x' AND p.age > 3 OR p.id = 'y' RETURN p")
                .unwrap();
        // ((NOT a) AND b) OR c
        assert!(matches!(query.where_clause, Some(Expr::Or(_, _))));
    }

    #[test]
    fn test_parse_in_and_string_ops() {
        let query = parse(
            "MATCH (p) WHERE p.name IN ['Ada', 'Bob'] AND p.name STARTS WITH 'A' RETURN p.name",
        )
        .unwrap();
        assert!(query.where_clause.is_some());
    }

    #[test]
    fn test_parse_order_limit_alias() {
        let query =
            parse("MATCH (p:PERSON) RETURN p.name AS who ORDER BY who DESC LIMIT 5").unwrap();
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.order_by.len(), 1);
        assert!(query.order_by[0].descending);
        match &query.return_items {
            ReturnItems::Items(items) => {
                assert_eq!(items[0].column_name(), "who");
            },
            ReturnItems::Star => panic!("expected item list"),
        }
    }

    #[test]
    fn test_parse_multiple_matches() {
        let query = parse("MATCH (p:PERSON) MATCH (o:ORGANIZATION) RETURN p, o").unwrap();
        assert_eq!(query.matches.len(), 2);
    }

    #[test]
    fn test_parse_return_star() {
        let query = parse("MATCH (p) RETURN *").unwrap();
        assert_eq!(query.return_items, ReturnItems::Star);
    }

    #[test]
    fn test_missing_return_is_error() {
        let err = parse("MATCH (p:PERSON)");
        assert!(matches!(err, Err(Error::CypherParse { .. })));
    }

    #[test]
    fn test_trailing_garbage_is_error() {
        let err = parse("MATCH (p) RETURN p garbage here");
        assert!(matches!(err, Err(Error::CypherParse { .. })));
    }
}
