// SPDX-License-Identifier: PMPL-1.0-or-later
//! Relation discovery from canonical rule text.

use tracing::debug;

use crate::lexer::{Lexer, TokenKind};

/// Distinct relations referenced by a canonical rule, in order of first
/// appearance.
///
/// Never fails: tokenizing stops at the first invalid character and the
/// relations found up to that point are returned. Names inside string
/// literals are not references.
pub fn relations_of(canonical: &str) -> Vec<String> {
    let mut relations: Vec<String> = Vec::new();
    for token in Lexer::new(canonical) {
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "relation discovery stopped early");
                break;
            }
        };
        if let TokenKind::Column(col) = token.kind {
            if !relations.iter().any(|r| *r == col.relation) {
                relations.push(col.relation);
            }
        }
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_in_first_appearance_order() {
        assert_eq!(
            relations_of("a.x = '1' AND b.y = '2' AND a.z = '3'"),
            vec!["a", "b"]
        );
        assert_eq!(
            relations_of("ports.ifIndex = 3 OR devices.device_id = 1"),
            vec!["ports", "devices"]
        );
    }

    #[test]
    fn test_empty_and_constant_rules() {
        assert!(relations_of("").is_empty());
        assert!(relations_of("1").is_empty());
    }

    #[test]
    fn test_string_literals_are_ignored() {
        assert_eq!(
            relations_of("devices.hostname = 'ports.ifIndex is here'"),
            vec!["devices"]
        );
    }

    #[test]
    fn test_column_at_end_of_input() {
        // No trailing whitespace is needed after the last column.
        assert_eq!(relations_of("1 = sensors.sensor_id"), vec!["sensors"]);
    }

    #[test]
    fn test_stops_at_first_lex_error() {
        assert_eq!(relations_of("a.x = 1 && b.y = 2"), vec!["a"]);
        assert_eq!(relations_of("a.x = 'open b.y"), vec!["a"]);
    }
}
