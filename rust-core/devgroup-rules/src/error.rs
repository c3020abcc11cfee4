// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rule validation errors.

use serde::Serialize;
use thiserror::Error;

/// Errors raised while translating or parsing a rule expression.
///
/// Every variant is a validation failure: the offending rule must not be
/// persisted and any previous rule stays in force.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleError {
    #[error("unterminated quote starting at byte {offset}")]
    UnterminatedQuote { offset: usize },

    #[error("pattern operator '{operator}' has no operand")]
    MissingPatternOperand { operator: String },

    #[error("malformed column reference '{token}', expected relation.column")]
    MalformedColumn { token: String },

    #[error("unexpected character '{found}' at byte {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected {found} at byte {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        offset: usize,
        expected: &'static str,
    },

    #[error("unexpected end of rule, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unqualified column '{name}' at byte {offset}, write it as relation.column")]
    UnqualifiedColumn { name: String, offset: usize },

    #[error("invalid number '{text}' at byte {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("rule nests NOT or parentheses deeper than {max} levels at byte {offset}")]
    TooDeep { offset: usize, max: usize },
}

impl RuleError {
    /// True for failures of the legacy dialect translator.
    pub fn is_legacy_error(&self) -> bool {
        matches!(
            self,
            RuleError::MissingPatternOperand { .. } | RuleError::MalformedColumn { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_position() {
        let err = RuleError::UnexpectedChar {
            found: '$',
            offset: 12,
        };
        assert_eq!(err.to_string(), "unexpected character '$' at byte 12");
    }

    #[test]
    fn test_legacy_classification() {
        assert!(RuleError::MissingPatternOperand {
            operator: "~".into()
        }
        .is_legacy_error());
        assert!(!RuleError::UnexpectedEnd { expected: "operand" }.is_legacy_error());
    }
}
