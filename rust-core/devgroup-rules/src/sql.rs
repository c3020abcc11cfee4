// SPDX-License-Identifier: PMPL-1.0-or-later
//! Parameterized SQL rendering of rule predicates.
//!
//! Literals never appear in the SQL text; each one becomes a `?`
//! placeholder with its value pushed onto `params` in order.

use std::fmt::Write;

use serde::Serialize;

use crate::expr::{Expr, Operand};
use crate::value::Value;

/// SQL text plus positional parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    /// Render a predicate for a `WHERE` clause.
    pub fn predicate(expr: &Expr) -> Self {
        let mut frag = SqlFragment::default();
        frag.push_expr(expr);
        frag
    }

    fn push_operand(&mut self, op: &Operand) {
        match op {
            Operand::Column(c) => {
                let _ = write!(self.sql, "{}.{}", c.relation, c.column);
            }
            Operand::Literal(v) => {
                self.sql.push('?');
                self.params.push(v.clone());
            }
        }
    }

    fn push_grouped(&mut self, expr: &Expr, parens: bool) {
        if parens {
            self.sql.push('(');
            self.push_expr(expr);
            self.sql.push(')');
        } else {
            self.push_expr(expr);
        }
    }

    /// Nested connectives are always grouped.
    fn push_joined(&mut self, items: &[Expr], sep: &str) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(sep);
            }
            self.push_grouped(item, matches!(item, Expr::And(..) | Expr::Or(..)));
        }
    }

    fn push_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::And(items) => self.push_joined(items, " AND "),
            Expr::Or(items) => self.push_joined(items, " OR "),
            Expr::Not(inner) => {
                self.sql.push_str("NOT (");
                self.push_expr(inner);
                self.sql.push(')');
            }
            Expr::Compare { lhs, op, rhs } => {
                self.push_operand(lhs);
                let _ = write!(self.sql, " {op} ");
                self.push_operand(rhs);
            }
            Expr::Like {
                subject,
                pattern,
                negated,
            } => {
                self.push_operand(subject);
                self.sql
                    .push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                self.push_operand(pattern);
            }
            Expr::Operand(op) => self.push_operand(op),
        }
    }
}
