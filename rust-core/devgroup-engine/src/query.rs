// SPDX-License-Identifier: PMPL-1.0-or-later
//! Membership query planning and execution.
//!
//! A rule touching one relation is a plain filtered scan of that relation.
//! A rule touching several is an inner join rooted at the base relation on
//! the identifier column; an entity qualifies when any combination of its
//! joined rows satisfies the rule.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use devgroup_rules::{ColumnRef, Expr, RowSource, Rule, SqlFragment, Value};
use devgroup_storage::{StorageBackend, StorageError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::{Catalog, RelationStore, Row};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::group::{DeviceId, RuleWarning};

/// Shape of a membership query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Plan {
    /// Blank rule: selects nothing.
    Empty,
    /// Filtered scan of one relation, no join.
    Single { relation: String },
    /// Base relation inner-joined with every other referenced relation.
    Join { base: String, joins: Vec<String> },
}

impl Plan {
    /// Every relation the plan reads, base first.
    pub fn relations(&self) -> Vec<&str> {
        match self {
            Plan::Empty => Vec::new(),
            Plan::Single { relation } => vec![relation.as_str()],
            Plan::Join { base, joins } => std::iter::once(base.as_str())
                .chain(joins.iter().map(String::as_str))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MembershipQuery {
    rule: Rule,
    plan: Plan,
    base: String,
    id_column: String,
    warnings: Vec<RuleWarning>,
}

impl MembershipQuery {
    /// Decide how `rule` will be evaluated from its discovered relations.
    pub fn plan(config: &EngineConfig, rule: &Rule) -> Self {
        let mut warnings = Vec::new();
        let relations = rule.relations();

        let plan = if rule.is_empty() {
            Plan::Empty
        } else {
            match relations {
                [] => {
                    warn!(rule = %rule.text(), base = %config.base_relation, "rule references no relation");
                    warnings.push(RuleWarning::NoRelationReferences);
                    Plan::Single {
                        relation: config.base_relation.clone(),
                    }
                }
                [only] => Plan::Single {
                    relation: only.clone(),
                },
                many => Plan::Join {
                    base: config.base_relation.clone(),
                    joins: many
                        .iter()
                        .filter(|r| **r != config.base_relation)
                        .cloned()
                        .collect(),
                },
            }
        };

        debug!(rule = %rule.text(), ?plan, "planned membership query");
        Self {
            rule: rule.clone(),
            plan,
            base: config.base_relation.clone(),
            id_column: config.id_column.clone(),
            warnings,
        }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn shape(&self) -> &Plan {
        &self.plan
    }

    pub fn warnings(&self) -> &[RuleWarning] {
        &self.warnings
    }

    /// Relations joined onto the base; empty unless the plan is a join.
    pub fn joined_relations(&self) -> &[String] {
        match &self.plan {
            Plan::Join { joins, .. } => joins,
            _ => &[],
        }
    }

    /// Check every relation and column the query reads against the catalog.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), ConfigError> {
        for relation in self.plan.relations() {
            let schema = catalog
                .get(relation)
                .ok_or_else(|| ConfigError::UnresolvableRelation {
                    relation: relation.to_string(),
                    reason: "not registered in the catalog".to_string(),
                })?;
            if !schema.has_column(&self.id_column) {
                return Err(ConfigError::UnresolvableRelation {
                    relation: relation.to_string(),
                    reason: format!("no '{}' column to join on", self.id_column),
                });
            }
        }

        if let Some(expr) = self.rule.expr() {
            for column in expr.columns() {
                let known = catalog
                    .get(&column.relation)
                    .is_some_and(|schema| schema.has_column(&column.column));
                if !known {
                    return Err(ConfigError::UnknownColumn {
                        relation: column.relation.clone(),
                        column: column.column.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run the query against stored relation rows.
    pub async fn execute<B: StorageBackend + Clone>(
        &self,
        store: &RelationStore<B>,
    ) -> Result<BTreeSet<DeviceId>, StorageError> {
        let Some(expr) = self.rule.expr() else {
            return Ok(BTreeSet::new());
        };

        let mut members = BTreeSet::new();
        match &self.plan {
            Plan::Empty => {}
            Plan::Single { relation } => {
                for (device, rows) in store.rows_by_device(relation).await? {
                    let hit = rows.iter().any(|row| {
                        expr.matches(&JoinedRow {
                            rows: vec![(relation.as_str(), row)],
                        })
                    });
                    if hit {
                        members.insert(device);
                    }
                }
            }
            Plan::Join { base, joins } => {
                let base_rows = store.rows_by_device(base).await?;
                let mut joined: Vec<(&str, BTreeMap<DeviceId, Vec<Row>>)> =
                    Vec::with_capacity(joins.len());
                for relation in joins {
                    joined.push((relation.as_str(), store.rows_by_device(relation).await?));
                }

                for (device, rows) in &base_rows {
                    let mut sides: Vec<(&str, &[Row])> = vec![(base.as_str(), rows.as_slice())];
                    let complete = joined.iter().all(|(relation, by_device)| {
                        match by_device.get(device) {
                            Some(rows) if !rows.is_empty() => {
                                sides.push((*relation, rows.as_slice()));
                                true
                            }
                            _ => false,
                        }
                    });
                    if complete && any_combination(expr, &sides, &mut Vec::new()) {
                        members.insert(*device);
                    }
                }
            }
        }

        debug!(plan = ?self.plan, members = members.len(), "membership query executed");
        Ok(members)
    }

    /// SQL for collaborators backed by a relational database. Literals are
    /// bound as `?` parameters.
    pub fn to_sql(&self) -> SqlFragment {
        let id = &self.id_column;
        let (from, first) = match &self.plan {
            Plan::Empty => {
                let base = &self.base;
                return SqlFragment {
                    sql: format!("SELECT {base}.{id} FROM {base} WHERE 1 = 0"),
                    params: Vec::new(),
                };
            }
            Plan::Single { relation } => (relation.clone(), relation),
            Plan::Join { base, joins } => {
                let mut from = base.clone();
                for join in joins {
                    let _ = write!(from, " INNER JOIN {join} ON {join}.{id} = {base}.{id}");
                }
                (from, base)
            }
        };

        let distinct = if matches!(self.plan, Plan::Join { .. }) { "DISTINCT " } else { "" };
        let mut sql = format!("SELECT {distinct}{first}.{id} FROM {from}");
        let mut params: Vec<Value> = Vec::new();
        if let Some(expr) = self.rule.expr() {
            let predicate = SqlFragment::predicate(expr);
            sql.push_str(" WHERE ");
            sql.push_str(&predicate.sql);
            params = predicate.params;
        }
        SqlFragment { sql, params }
    }
}

/// One row per relation, as seen by the evaluator.
struct JoinedRow<'a> {
    rows: Vec<(&'a str, &'a Row)>,
}

impl RowSource for JoinedRow<'_> {
    fn value(&self, column: &ColumnRef) -> Option<&Value> {
        self.rows
            .iter()
            .find(|(relation, _)| *relation == column.relation)
            .and_then(|(_, row)| row.get(&column.column))
    }
}

/// Depth-first search over the row combinations of the joined relations,
/// stopping at the first one that satisfies `expr`.
fn any_combination<'a>(
    expr: &Expr,
    sides: &[(&'a str, &'a [Row])],
    chosen: &mut Vec<(&'a str, &'a Row)>,
) -> bool {
    let Some((&(relation, rows), rest)) = sides.split_first() else {
        return expr.matches(&JoinedRow {
            rows: chosen.clone(),
        });
    };
    for row in rows {
        chosen.push((relation, row));
        let found = any_combination(expr, rest, chosen);
        chosen.pop();
        if found {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(rule: &str) -> MembershipQuery {
        MembershipQuery::plan(&EngineConfig::default(), &Rule::parse(rule).unwrap())
    }

    #[test]
    fn test_single_relation_never_joins() {
        let q = planned("ports.port_id > 0");
        assert_eq!(
            q.shape(),
            &Plan::Single {
                relation: "ports".into()
            }
        );
        assert!(q.joined_relations().is_empty());
        assert!(q.warnings().is_empty());
    }

    #[test]
    fn test_join_excludes_base() {
        let q = planned("devices.device_id = 2 AND ports.ifIndex = 3 AND devices.hostname = 'x'");
        assert_eq!(
            q.shape(),
            &Plan::Join {
                base: "devices".into(),
                joins: vec!["ports".into()]
            }
        );
    }

    #[test]
    fn test_join_without_base_reference_still_roots_at_base() {
        let q = planned("ports.ifIndex = 3 OR sensors.sensor_id = 9");
        assert_eq!(q.joined_relations(), ["ports".to_string(), "sensors".to_string()]);
        assert_eq!(q.shape().relations(), vec!["devices", "ports", "sensors"]);
    }

    #[test]
    fn test_constant_rule_uses_base_and_warns() {
        let q = planned("1");
        assert_eq!(
            q.shape(),
            &Plan::Single {
                relation: "devices".into()
            }
        );
        assert_eq!(q.warnings(), [RuleWarning::NoRelationReferences]);
    }

    #[test]
    fn test_blank_rule_plans_empty() {
        let q = planned("");
        assert_eq!(q.shape(), &Plan::Empty);
        assert!(q.warnings().is_empty());
    }

    #[test]
    fn test_sql_empty_selects_nothing() {
        let sql = planned("").to_sql();
        assert_eq!(sql.sql, "SELECT devices.device_id FROM devices WHERE 1 = 0");
        assert!(sql.params.is_empty());
    }

    #[test]
    fn test_sql_single() {
        let sql = planned("devices.hostname LIKE('%core%')").to_sql();
        assert_eq!(
            sql.sql,
            "SELECT devices.device_id FROM devices WHERE devices.hostname LIKE ?"
        );
        assert_eq!(sql.params, vec![Value::text("%core%")]);
    }

    #[test]
    fn test_sql_join() {
        let sql = planned("devices.device_id < '50' AND sensors.sensor_id != '179'").to_sql();
        assert_eq!(
            sql.sql,
            "SELECT DISTINCT devices.device_id FROM devices \
             INNER JOIN sensors ON sensors.device_id = devices.device_id \
             WHERE devices.device_id < ? AND sensors.sensor_id != ?"
        );
        assert_eq!(sql.params, vec![Value::text("50"), Value::text("179")]);
    }

    #[test]
    fn test_validate_reports_missing_pieces() {
        let catalog: Catalog = [
            crate::catalog::RelationSchema::new("devices", ["device_id", "hostname"]),
            crate::catalog::RelationSchema::new("locations", ["location_id"]),
        ]
        .into_iter()
        .collect();

        assert!(planned("devices.hostname = 'a'").validate(&catalog).is_ok());
        assert!(matches!(
            planned("ports.ifIndex = 1").validate(&catalog),
            Err(ConfigError::UnresolvableRelation { relation, .. }) if relation == "ports"
        ));
        assert!(matches!(
            planned("locations.location_id = 1").validate(&catalog),
            Err(ConfigError::UnresolvableRelation { relation, .. }) if relation == "locations"
        ));
        assert_eq!(
            planned("devices.sysName = 'a'").validate(&catalog),
            Err(ConfigError::UnknownColumn {
                relation: "devices".into(),
                column: "sysName".into()
            })
        );
    }
}
