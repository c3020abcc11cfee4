// SPDX-License-Identifier: PMPL-1.0-or-later
//! Translator from the legacy rule dialect to canonical text.
//!
//! Legacy rules look like
//! `%devices.hostname ~ "core" && %ports.ifIndex = "3" &&`: columns carry a
//! `%` sigil, `~`/`!~` are substring or wildcard matches with `@` as the
//! wildcard, and connectives are `&&`/`||`. Editors of the old format
//! always left a trailing connective, which is dropped.

use tracing::trace;

use crate::error::RuleError;
use crate::ident::is_qualified_column;
use crate::value::quote;

const COMPARISON_OPS: [&str; 7] = ["=", "!=", "<>", "<", "<=", ">", ">="];

/// Translate a legacy-dialect rule into the canonical dialect.
///
/// Quoting only groups characters into one field. A quoted `"&&"` is still
/// a connective and a quoted `"%devices.hostname"` still a column; the field
/// after `~` or `!~` is always the pattern.
pub fn translate(legacy: &str) -> Result<String, RuleError> {
    let body = strip_trailing_connective(legacy);
    let fields = split_fields(body)?;

    let mut out: Vec<String> = Vec::with_capacity(fields.len());
    let mut iter = fields.into_iter();
    while let Some(field) = iter.next() {
        let text = field.as_str();
        match text {
            "~" | "!~" => {
                let operand = iter.next().ok_or_else(|| RuleError::MissingPatternOperand {
                    operator: text.to_string(),
                })?;
                let pattern = if operand.contains('@') {
                    operand.replace('@', "%")
                } else {
                    format!("%{operand}%")
                };
                if text == "!~" {
                    out.push("NOT".to_string());
                }
                out.push(format!("LIKE({})", quote(&pattern)));
            }
            "&&" => out.push("AND".to_string()),
            "||" => out.push("OR".to_string()),
            op if COMPARISON_OPS.contains(&op) => out.push(op.to_string()),
            _ => match text.strip_prefix('%') {
                Some(column) if is_qualified_column(column) => out.push(column.to_string()),
                Some(_) => {
                    return Err(RuleError::MalformedColumn {
                        token: text.to_string(),
                    })
                }
                None => out.push(literal(text)),
            },
        }
    }

    let canonical = out.join(" ");
    trace!(%legacy, %canonical, "translated legacy rule");
    Ok(canonical)
}

/// Drop one trailing `&&` or `||` token and the whitespace around it.
fn strip_trailing_connective(input: &str) -> &str {
    let trimmed = input.trim_end();
    for connective in ["&&", "||"] {
        if let Some(rest) = trimmed.strip_suffix(connective) {
            if rest.is_empty() || rest.ends_with(char::is_whitespace) {
                return rest.trim_end();
            }
        }
    }
    trimmed
}

/// Whitespace-separated fields with CSV-style double quoting.
fn split_fields(input: &str) -> Result<Vec<String>, RuleError> {
    let mut fields = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let Some(&(start, first)) = chars.peek() else {
            break;
        };

        let mut text = String::new();
        if first == '"' {
            chars.next();
            loop {
                match chars.next() {
                    None => return Err(RuleError::UnterminatedQuote { offset: start }),
                    Some((_, '"')) => {
                        if chars.next_if(|(_, c)| *c == '"').is_some() {
                            text.push('"');
                        } else {
                            break;
                        }
                    }
                    Some((_, '\\')) => {
                        text.push('\\');
                        if let Some((_, escaped)) = chars.next() {
                            text.push(escaped);
                        }
                    }
                    Some((_, ch)) => text.push(ch),
                }
            }
        }
        // Unquoted field, or trailing text glued to a closing quote.
        while let Some((_, ch)) = chars.next_if(|(_, c)| !c.is_whitespace()) {
            text.push(ch);
        }
        fields.push(text);
    }

    Ok(fields)
}

/// One layer of matching quotes is removed before re-quoting.
fn literal(text: &str) -> String {
    let inner = ['"', '\'']
        .into_iter()
        .find_map(|q| {
            text.strip_prefix(q)
                .and_then(|rest| rest.strip_suffix(q))
        })
        .unwrap_or(text);
    quote(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_match() {
        assert_eq!(
            translate(r#"%devices.hostname ~ "Test input" &&"#).unwrap(),
            "devices.hostname LIKE('%Test input%')"
        );
    }

    #[test]
    fn test_negated_wildcard_match() {
        assert_eq!(
            translate(r#"%devices.hostname !~ "more.@-@" &&"#).unwrap(),
            "devices.hostname NOT LIKE('more.%-%')"
        );
    }

    #[test]
    fn test_numeric_comparisons_and_join() {
        assert_eq!(
            translate(r#"%devices.device_id < "50" && %sensors.sensor_id != "179" &&"#).unwrap(),
            "devices.device_id < '50' AND sensors.sensor_id != '179'"
        );
    }

    #[test]
    fn test_or_chain() {
        assert_eq!(
            translate(
                r#"%devices.device_id = "42" || %devices_attribs.attrib_value ~ "@end" || %devices.hostname = "fun time" &&"#
            )
            .unwrap(),
            "devices.device_id = '42' OR devices_attribs.attrib_value LIKE('%end') OR devices.hostname = 'fun time'"
        );
    }

    #[test]
    fn test_trailing_or_is_stripped() {
        assert_eq!(translate("%a.b = 1 ||").unwrap(), "a.b = '1'");
    }

    #[test]
    fn test_no_trailing_connective() {
        assert_eq!(translate("%a.b = 1").unwrap(), "a.b = '1'");
    }

    #[test]
    fn test_connective_glued_to_value_is_not_stripped() {
        assert_eq!(translate("%a.b = x&&").unwrap(), "a.b = 'x&&'");
    }

    #[test]
    fn test_single_quotes_are_doubled() {
        assert_eq!(
            translate(r#"%devices.hostname = "o'brien" &&"#).unwrap(),
            "devices.hostname = 'o''brien'"
        );
        assert_eq!(
            translate(r#"%devices.hostname ~ "it's" &&"#).unwrap(),
            "devices.hostname LIKE('%it''s%')"
        );
    }

    #[test]
    fn test_unquoted_literal_loses_one_quote_layer() {
        assert_eq!(translate("%a.b = 'x'").unwrap(), "a.b = 'x'");
    }

    #[test]
    fn test_missing_pattern_operand() {
        assert_eq!(
            translate("%devices.hostname ~ &&").unwrap_err(),
            RuleError::MissingPatternOperand {
                operator: "~".into()
            }
        );
    }

    #[test]
    fn test_malformed_column() {
        assert_eq!(
            translate(r#"%hostname = "x""#).unwrap_err(),
            RuleError::MalformedColumn {
                token: "%hostname".into()
            }
        );
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(
            translate(r#"%a.b = "open"#).unwrap_err(),
            RuleError::UnterminatedQuote { offset: 7 }
        );
    }

    #[test]
    fn test_split_fields_csv_rules() {
        assert_eq!(
            split_fields(r#"%a.b = "two words"  "say ""hi""" x"#).unwrap(),
            vec!["%a.b", "=", "two words", r#"say "hi""#, "x"]
        );
    }

    #[test]
    fn test_quoted_fields_are_classified_by_content() {
        assert_eq!(
            translate(r#"%devices.hostname "=" "core" "&&" "%ports.ifIndex" = "3" &&"#).unwrap(),
            "devices.hostname = 'core' AND ports.ifIndex = '3'"
        );
        assert_eq!(
            translate(r#"%devices.hostname = "||" &&"#).unwrap(),
            "devices.hostname = OR"
        );
    }

    #[test]
    fn test_quoted_pattern_operand_stays_a_pattern() {
        assert_eq!(
            translate(r#"%devices.hostname ~ "&&" &&"#).unwrap(),
            "devices.hostname LIKE('%&&%')"
        );
        assert_eq!(
            translate(r#"%devices.hostname !~ "%ports.ifIndex" &&"#).unwrap(),
            "devices.hostname NOT LIKE('%%ports.ifIndex%')"
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(translate("").unwrap(), "");
        assert_eq!(translate("&&").unwrap(), "");
    }
}
