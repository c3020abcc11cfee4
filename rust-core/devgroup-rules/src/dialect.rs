// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rule dialect detection.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::legacy::translate;

/// The two textual forms a stored rule may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Canonical,
    Legacy,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Canonical => write!(f, "canonical"),
            Dialect::Legacy => write!(f, "legacy"),
        }
    }
}

/// Legacy rules start with a `%`-prefixed column.
pub fn detect_dialect(raw: &str) -> Dialect {
    if raw.trim_start().starts_with('%') {
        Dialect::Legacy
    } else {
        Dialect::Canonical
    }
}

/// Canonical text for a rule in either dialect.
///
/// Canonical input is borrowed unchanged.
pub fn canonicalize(raw: &str) -> Result<Cow<'_, str>, RuleError> {
    match detect_dialect(raw) {
        Dialect::Canonical => Ok(Cow::Borrowed(raw)),
        Dialect::Legacy => translate(raw).map(Cow::Owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(detect_dialect("  %devices.hostname ~ \"x\""), Dialect::Legacy);
        assert_eq!(detect_dialect("devices.hostname LIKE '%x%'"), Dialect::Canonical);
        assert_eq!(detect_dialect(""), Dialect::Canonical);
    }

    #[test]
    fn test_canonicalize_borrows_canonical() {
        assert!(matches!(canonicalize("a.b = 1").unwrap(), Cow::Borrowed("a.b = 1")));
        assert_eq!(canonicalize("%a.b = 1 &&").unwrap(), "a.b = '1'");
    }
}
