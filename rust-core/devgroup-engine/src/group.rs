// SPDX-License-Identifier: PMPL-1.0-or-later
//! Group records and the values engine operations return.

use std::fmt;

use chrono::{DateTime, Utc};
use devgroup_rules::{detect_dialect, Dialect, RuleError};
use serde::{Deserialize, Serialize};

use crate::query::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group as persisted under `groups:{id}`.
///
/// `rule` holds whatever dialect was stored; rows written by this engine
/// are always canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rule: String,
    /// Membership does not reflect `rule`.
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl GroupRow {
    pub fn dialect(&self) -> Dialect {
        detect_dialect(&self.rule)
    }
}

/// A group as returned to callers, rule always canonical.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub rule: String,
    /// Dialect of the persisted rule; `Legacy` means a migration is pending.
    pub stored_dialect: Dialect,
    pub stale: bool,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl Group {
    pub fn needs_migration(&self) -> bool {
        self.stored_dialect == Dialect::Legacy
    }
}

/// Input for [`GroupEngine::create`](crate::GroupEngine::create).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Rule in either dialect.
    pub rule: String,
}

impl NewGroup {
    pub fn new(name: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rule: rule.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One line of the group listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub member_count: usize,
    pub stale: bool,
}

/// Non-fatal findings about a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleWarning {
    /// The rule names no relation and is evaluated against the base
    /// relation alone.
    NoRelationReferences,
}

impl fmt::Display for RuleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleWarning::NoRelationReferences => {
                write!(f, "rule references no relation, evaluated against the base relation")
            }
        }
    }
}

/// Result of a successful rule write or refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleUpdate {
    pub group_id: GroupId,
    /// Canonical rule now in force.
    pub rule: String,
    pub plan: Plan,
    pub added: usize,
    pub removed: usize,
    pub member_count: usize,
    pub warnings: Vec<RuleWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    Migrated { from: String, to: String },
    AlreadyCanonical,
    /// The stored legacy rule does not translate; the row is left as is.
    Failed { rule: String, error: RuleError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_defaults_for_older_records() {
        let row: GroupRow =
            serde_json::from_str(r#"{"id": 4, "name": "edge", "rule": "%devices.hostname ~ \"edge\" &&"}"#)
                .unwrap();
        assert_eq!(row.id, GroupId(4));
        assert_eq!(row.description, "");
        assert!(!row.stale);
        assert_eq!(row.reconciled_at, None);
        assert_eq!(row.dialect(), Dialect::Legacy);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&DeviceId(12)).unwrap(), "12");
        assert_eq!(GroupId(5).to_string(), "5");
    }
}
