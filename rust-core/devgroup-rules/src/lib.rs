// SPDX-License-Identifier: PMPL-1.0-or-later
//! Device Group Rules
//!
//! The rule language behind dynamic device groups: a small boolean filter
//! over qualified `relation.column` references. Two textual dialects exist.
//! The canonical one is what the engine evaluates; the legacy one
//! (`%devices.hostname ~ "core" &&`) is accepted on input and translated.
//!
//! ```rust
//! use devgroup_rules::{relations_of, translate, Rule};
//!
//! let canonical = translate(r#"%devices.hostname ~ "core" && %ports.ifIndex = "3" &&"#).unwrap();
//! assert_eq!(canonical, "devices.hostname LIKE('%core%') AND ports.ifIndex = '3'");
//! assert_eq!(relations_of(&canonical), vec!["devices", "ports"]);
//!
//! let rule = Rule::parse(&canonical).unwrap();
//! assert_eq!(rule.relations(), ["devices", "ports"]);
//! ```

pub mod dialect;
pub mod discover;
pub mod error;
pub mod expr;
pub mod ident;
pub mod legacy;
pub mod lexer;
pub mod sql;
pub mod value;

use serde::Serialize;

pub use dialect::{canonicalize, detect_dialect, Dialect};
pub use discover::relations_of;
pub use error::RuleError;
pub use expr::{parse, Expr, Operand, RowSource};
pub use ident::{is_identifier, is_qualified_column};
pub use legacy::translate;
pub use lexer::{CmpOp, ColumnRef};
pub use sql::SqlFragment;
pub use value::{like_match, Value};

/// A validated rule: canonical text, its syntax tree and the relations it
/// references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    text: String,
    #[serde(skip)]
    expr: Option<Expr>,
    relations: Vec<String>,
}

impl Rule {
    /// Validate a rule in either dialect.
    ///
    /// Legacy input is translated first; the resulting rule always holds
    /// canonical text.
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let text = canonicalize(raw)?.trim().to_string();
        let expr = parse(&text)?;
        let relations = relations_of(&text);
        Ok(Self {
            text,
            expr,
            relations,
        })
    }

    /// Canonical text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `None` for a blank rule.
    pub fn expr(&self) -> Option<&Expr> {
        self.expr.as_ref()
    }

    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_stores_canonical() {
        let rule = Rule::parse(r#"%devices.hostname !~ "lab@" &&"#).unwrap();
        assert_eq!(rule.text(), "devices.hostname NOT LIKE('lab%')");
        assert_eq!(rule.relations(), ["devices"]);
        assert!(!rule.is_empty());
    }

    #[test]
    fn test_blank_rule() {
        let rule = Rule::parse("  ").unwrap();
        assert!(rule.is_empty());
        assert!(rule.relations().is_empty());
        assert_eq!(rule.text(), "");
    }

    #[test]
    fn test_invalid_rule_rejected() {
        assert!(Rule::parse("devices.hostname =").is_err());
        assert!(Rule::parse("%devices.hostname ~").is_err());
    }

    #[test]
    fn test_deeply_nested_rule_is_a_validation_error() {
        let raw = format!("{}devices.device_id = 1{}", "(".repeat(5_000), ")".repeat(5_000));
        assert!(matches!(Rule::parse(&raw), Err(RuleError::TooDeep { .. })));
    }
}
