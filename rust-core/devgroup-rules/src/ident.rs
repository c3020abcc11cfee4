// SPDX-License-Identifier: PMPL-1.0-or-later
//! Identifier checks for relation and column names.
//!
//! Names end up in rendered SQL, so anything that is not a plain identifier
//! is refused before it can reach a query.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

static QUALIFIED_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_]*$")
        .expect("qualified column pattern is valid")
});

/// `true` if `name` is a bare identifier such as `devices` or `ifIndex`.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// `true` if `name` has the form `relation.column`.
pub fn is_qualified_column(name: &str) -> bool {
    QUALIFIED_COLUMN.is_match(name)
}

pub(crate) fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

pub(crate) fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}
