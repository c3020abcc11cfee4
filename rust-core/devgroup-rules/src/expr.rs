// SPDX-License-Identifier: PMPL-1.0-or-later
//! Canonical rule syntax tree, parser and evaluator.
//!
//! Grammar (keywords case-insensitive):
//!
//! ```text
//! rule      := or_expr?
//! or_expr   := and_expr ( OR and_expr )*
//! and_expr  := unary ( AND unary )*
//! unary     := NOT unary | primary
//! primary   := '(' or_expr ')' | predicate
//! predicate := operand ( cmp operand | NOT? LIKE '('? operand ')'? )?
//! operand   := relation.column | string | number | TRUE | FALSE
//! ```
//!
//! Chains of `AND` or `OR` become one n-ary node, so the tree only grows
//! deeper through `NOT` and parentheses. Those are capped at [`MAX_DEPTH`].
//!
//! Evaluation uses SQL three-valued logic: `None` is *unknown* and a rule
//! only selects rows for which it evaluates to `Some(true)`.

use std::fmt;

use crate::error::RuleError;
use crate::lexer::{tokenize, CmpOp, ColumnRef, Token, TokenKind};
use crate::value::{like_match, Value};

static NULL: Value = Value::Null;

/// Deepest nesting of `NOT` and parentheses a rule may use.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Literal(Value),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(c) => write!(f, "{c}"),
            Operand::Literal(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Two or more conjuncts.
    And(Vec<Expr>),
    /// Two or more disjuncts.
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    Like {
        subject: Operand,
        pattern: Operand,
        negated: bool,
    },
    /// A bare operand used as a predicate, judged by truthiness.
    Operand(Operand),
}

/// Column lookups for one candidate row combination.
pub trait RowSource {
    /// Value of `column`, or `None` when the relation or column is absent.
    fn value(&self, column: &ColumnRef) -> Option<&Value>;
}

impl Expr {
    /// Evaluate against a row source. `None` means unknown.
    pub fn eval(&self, rows: &dyn RowSource) -> Option<bool> {
        match self {
            Expr::And(items) => {
                let mut known = true;
                for item in items {
                    match item.eval(rows) {
                        Some(false) => return Some(false),
                        None => known = false,
                        Some(true) => {}
                    }
                }
                known.then_some(true)
            }
            Expr::Or(items) => {
                let mut known = true;
                for item in items {
                    match item.eval(rows) {
                        Some(true) => return Some(true),
                        None => known = false,
                        Some(false) => {}
                    }
                }
                known.then_some(false)
            }
            Expr::Not(inner) => inner.eval(rows).map(|b| !b),
            Expr::Compare { lhs, op, rhs } => {
                let ord = resolve(lhs, rows).compare(resolve(rhs, rows))?;
                Some(op.holds(ord))
            }
            Expr::Like {
                subject,
                pattern,
                negated,
            } => {
                let text = resolve(subject, rows).as_text()?;
                let pat = resolve(pattern, rows).as_text()?;
                Some(like_match(&text, &pat) != *negated)
            }
            Expr::Operand(op) => resolve(op, rows).truthiness(),
        }
    }

    /// `true` only when the expression is definitely true.
    pub fn matches(&self, rows: &dyn RowSource) -> bool {
        self.eval(rows) == Some(true)
    }

    /// Every column reference, in source order, repeats included.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        fn push<'a>(op: &'a Operand, out: &mut Vec<&'a ColumnRef>) {
            if let Operand::Column(c) = op {
                out.push(c);
            }
        }
        match self {
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_columns(out);
                }
            }
            Expr::Not(inner) => inner.collect_columns(out),
            Expr::Compare { lhs, rhs, .. } => {
                push(lhs, out);
                push(rhs, out);
            }
            Expr::Like {
                subject, pattern, ..
            } => {
                push(subject, out);
                push(pattern, out);
            }
            Expr::Operand(op) => push(op, out),
        }
    }

    fn is_leaf(&self) -> bool {
        !matches!(self, Expr::And(..) | Expr::Or(..))
    }
}

fn resolve<'a>(op: &'a Operand, rows: &'a dyn RowSource) -> &'a Value {
    match op {
        Operand::Literal(v) => v,
        Operand::Column(c) => rows.value(c).unwrap_or(&NULL),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // A nested node of either kind only arises from parentheses.
            Expr::And(items) => fmt_joined(f, items, " AND ", |e| !e.is_leaf()),
            Expr::Or(items) => fmt_joined(f, items, " OR ", |e| matches!(e, Expr::Or(..))),
            Expr::Not(inner) => {
                f.write_str("NOT ")?;
                fmt_child(f, inner, !inner.is_leaf())
            }
            Expr::Compare { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Expr::Like {
                subject,
                pattern,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{subject} {not}LIKE({pattern})")
            }
            Expr::Operand(op) => write!(f, "{op}"),
        }
    }
}

fn fmt_joined(
    f: &mut fmt::Formatter<'_>,
    items: &[Expr],
    sep: &str,
    parens: impl Fn(&Expr) -> bool,
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        fmt_child(f, item, parens(item))?;
    }
    Ok(())
}

fn fmt_child(f: &mut fmt::Formatter<'_>, child: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({child})")
    } else {
        write!(f, "{child}")
    }
}

/// Parse a canonical rule. Blank input yields `Ok(None)`.
pub fn parse(input: &str) -> Result<Option<Expr>, RuleError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(unexpected(tok, "AND, OR or end of rule"));
    }
    Ok(Some(expr))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open `NOT`s and parentheses around the current position.
    depth: usize,
}

fn unexpected(tok: &Token, expected: &'static str) -> RuleError {
    RuleError::UnexpectedToken {
        found: tok.kind.describe(),
        offset: tok.offset,
        expected,
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_rparen(&mut self) -> Result<(), RuleError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::RParen,
                ..
            }) => Ok(()),
            Some(tok) => Err(unexpected(&tok, "')'")),
            None => Err(RuleError::UnexpectedEnd { expected: "')'" }),
        }
    }

    /// Consume the `NOT` or `(` at the cursor, one level deeper.
    fn descend(&mut self) -> Result<(), RuleError> {
        let offset = self.peek().map_or(0, |t| t.offset);
        if self.depth == MAX_DEPTH {
            return Err(RuleError::TooDeep {
                offset,
                max: MAX_DEPTH,
            });
        }
        self.depth += 1;
        self.pos += 1;
        Ok(())
    }

    fn or_expr(&mut self) -> Result<Expr, RuleError> {
        let mut items = vec![self.and_expr()?];
        while self.eat(&TokenKind::Or) {
            items.push(self.and_expr()?);
        }
        Ok(fold(items, Expr::Or))
    }

    fn and_expr(&mut self) -> Result<Expr, RuleError> {
        let mut items = vec![self.unary()?];
        while self.eat(&TokenKind::And) {
            items.push(self.unary()?);
        }
        Ok(fold(items, Expr::And))
    }

    fn unary(&mut self) -> Result<Expr, RuleError> {
        if self.peek_kind() == Some(&TokenKind::Not) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, RuleError> {
        if self.peek_kind() == Some(&TokenKind::LParen) {
            self.descend()?;
            let inner = self.or_expr()?;
            self.expect_rparen()?;
            self.depth -= 1;
            return Ok(inner);
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expr, RuleError> {
        let lhs = self.operand()?;

        match self.peek_kind() {
            Some(TokenKind::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let rhs = self.operand()?;
                Ok(Expr::Compare { lhs, op, rhs })
            }
            Some(TokenKind::Like) => {
                self.pos += 1;
                self.like_tail(lhs, false)
            }
            Some(TokenKind::Not)
                if matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.kind),
                    Some(TokenKind::Like)
                ) =>
            {
                self.pos += 2;
                self.like_tail(lhs, true)
            }
            _ => Ok(Expr::Operand(lhs)),
        }
    }

    fn like_tail(&mut self, subject: Operand, negated: bool) -> Result<Expr, RuleError> {
        let parenthesized = self.eat(&TokenKind::LParen);
        let pattern = self.operand()?;
        if parenthesized {
            self.expect_rparen()?;
        }
        Ok(Expr::Like {
            subject,
            pattern,
            negated,
        })
    }

    fn operand(&mut self) -> Result<Operand, RuleError> {
        const EXPECTED: &str = "column, literal or '('";
        let tok = self.advance().ok_or(RuleError::UnexpectedEnd { expected: EXPECTED })?;
        match tok.kind {
            TokenKind::Column(c) => Ok(Operand::Column(c)),
            TokenKind::Str(s) => Ok(Operand::Literal(Value::Text(s))),
            TokenKind::Number(v) => Ok(Operand::Literal(v)),
            TokenKind::True => Ok(Operand::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Operand::Literal(Value::Bool(false))),
            TokenKind::Ident(name) => Err(RuleError::UnqualifiedColumn {
                name,
                offset: tok.offset,
            }),
            _ => Err(unexpected(&tok, EXPECTED)),
        }
    }
}

/// A single item stands alone; more become one n-ary node.
fn fold(mut items: Vec<Expr>, node: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        if let Some(only) = items.pop() {
            return only;
        }
    }
    node(items)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct Rows(HashMap<ColumnRef, Value>);

    impl RowSource for Rows {
        fn value(&self, column: &ColumnRef) -> Option<&Value> {
            self.0.get(column)
        }
    }

    fn rows(pairs: &[(&str, &str, Value)]) -> Rows {
        Rows(
            pairs
                .iter()
                .map(|(r, c, v)| (ColumnRef::new(*r, *c), v.clone()))
                .collect(),
        )
    }

    fn p(src: &str) -> Expr {
        parse(src).unwrap().unwrap()
    }

    #[test]
    fn test_blank_rule_is_none() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_precedence_and_binds_tighter() {
        let expr = p("a.x = 1 OR a.y = 2 AND a.z = 3");
        match expr {
            Expr::Or(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[1], Expr::And(ref conj) if conj.len() == 2));
            }
            other => panic!("expected OR at the root, got: {other:?}"),
        }
    }

    #[test]
    fn test_chains_are_flat() {
        match p("a.x = 1 AND a.y = 2 AND a.z = 3 AND NOT a.w = 4") {
            Expr::And(items) => assert_eq!(items.len(), 4),
            other => panic!("expected AND, got: {other:?}"),
        }
    }

    #[test]
    fn test_deep_parentheses_rejected() {
        let src = format!("{}devices.device_id = 1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(
            parse(&src).unwrap_err(),
            RuleError::TooDeep {
                offset: MAX_DEPTH,
                max: MAX_DEPTH
            }
        );
    }

    #[test]
    fn test_long_not_chain_rejected() {
        let src = format!("{}devices.device_id = 1", "NOT ".repeat(20_000));
        assert_eq!(
            parse(&src).unwrap_err(),
            RuleError::TooDeep {
                offset: 4 * MAX_DEPTH,
                max: MAX_DEPTH
            }
        );
    }

    #[test]
    fn test_nesting_at_limit_accepted() {
        let src = format!(
            "{}devices.device_id = 1{}",
            "(NOT ".repeat(MAX_DEPTH / 2),
            ")".repeat(MAX_DEPTH / 2)
        );
        let expr = p(&src);
        let r = rows(&[("devices", "device_id", Value::Int(1))]);
        // An even number of NOTs.
        assert!(expr.matches(&r));
        assert_eq!(p(&expr.to_string()), expr);
    }

    #[test]
    fn test_long_conjunction() {
        let src = vec!["devices.device_id = 1"; 200_000].join(" AND ");
        let expr = p(&src);
        let hit = rows(&[("devices", "device_id", Value::Int(1))]);
        let miss = rows(&[("devices", "device_id", Value::Int(2))]);
        assert!(expr.matches(&hit));
        assert!(!expr.matches(&miss));
        assert_eq!(expr.columns().len(), 200_000);
        assert_eq!(expr.to_string().len(), src.len());
    }

    #[test]
    fn test_like_forms() {
        let plain = p("devices.hostname LIKE 'core%'");
        let parens = p("devices.hostname LIKE('core%')");
        assert_eq!(plain, parens);
        let negated = p("devices.hostname NOT LIKE('%lab%')");
        assert!(matches!(negated, Expr::Like { negated: true, .. }));
    }

    #[test]
    fn test_unqualified_column_rejected() {
        assert_eq!(
            parse("hostname = 'x'").unwrap_err(),
            RuleError::UnqualifiedColumn {
                name: "hostname".into(),
                offset: 0
            }
        );
    }

    #[test]
    fn test_dangling_connective() {
        assert_eq!(
            parse("a.b = 1 AND").unwrap_err(),
            RuleError::UnexpectedEnd {
                expected: "column, literal or '('"
            }
        );
    }

    #[test]
    fn test_trailing_garbage() {
        assert!(matches!(
            parse("a.b = 1 'x'").unwrap_err(),
            RuleError::UnexpectedToken { offset: 8, .. }
        ));
    }

    #[test]
    fn test_unbalanced_paren() {
        assert_eq!(
            parse("(a.b = 1").unwrap_err(),
            RuleError::UnexpectedEnd { expected: "')'" }
        );
    }

    #[test]
    fn test_eval_comparisons() {
        let r = rows(&[
            ("devices", "device_id", Value::Int(42)),
            ("devices", "hostname", Value::text("fun time")),
        ]);
        assert!(p("devices.device_id = '42'").matches(&r));
        assert!(p("devices.device_id < 50").matches(&r));
        assert!(p("devices.hostname = 'fun time'").matches(&r));
        assert!(!p("devices.hostname = 'FUN TIME'").matches(&r));
        assert!(p("devices.hostname LIKE 'FUN%'").matches(&r));
    }

    #[test]
    fn test_three_valued_logic() {
        let r = rows(&[("a", "x", Value::Null), ("a", "y", Value::Int(1))]);
        assert_eq!(p("a.x = 1").eval(&r), None);
        assert_eq!(p("NOT a.x = 1").eval(&r), None);
        assert_eq!(p("a.x = 1 OR a.y = 1").eval(&r), Some(true));
        assert_eq!(p("a.x = 1 AND a.y = 2").eval(&r), Some(false));
        assert_eq!(p("a.x = 1 AND a.y = 1").eval(&r), None);
        // Missing columns behave as NULL.
        assert_eq!(p("b.z != 1").eval(&r), None);
    }

    #[test]
    fn test_constant_rule() {
        let r = rows(&[]);
        assert!(p("1").matches(&r));
        assert!(!p("0").matches(&r));
        assert!(p("TRUE").matches(&r));
        assert!(!p("FALSE").matches(&r));
    }

    #[test]
    fn test_columns_in_order() {
        let expr = p("b.y = 1 AND (a.x = 2 OR b.y LIKE 'q')");
        let cols: Vec<String> = expr.columns().iter().map(|c| c.to_string()).collect();
        assert_eq!(cols, vec!["b.y", "a.x", "b.y"]);
    }

    #[test]
    fn test_display_reparses_to_same_tree() {
        for src in [
            "a.x = 1 OR a.y = 2 AND a.z = 3",
            "(a.x = 1 OR a.y = 2) AND a.z = 3",
            "NOT (a.x = 1 AND a.y != 'it''s')",
            "a.x NOT LIKE('%-%') OR a.y = 2.5",
            "a.x = 1 OR (a.y = 2 OR a.z = 3)",
            "(a.x = 1 AND a.y = 2) AND a.z = 3",
        ] {
            let expr = p(src);
            assert_eq!(p(&expr.to_string()), expr, "round trip of {src}");
        }
    }
}
