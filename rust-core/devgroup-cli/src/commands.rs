// SPDX-License-Identifier: PMPL-1.0-or-later
//! Subcommand implementations. Each returns the text to print.

use std::fmt::Write as _;

use anyhow::Result;
use devgroup_engine::{EngineConfig, EngineError, GroupEngine, NewGroup, Plan};
use devgroup_rules::{detect_dialect, relations_of, Rule};
use devgroup_storage::InMemoryBackend;
use serde_json::json;
use tracing::info;

use crate::fixture::Fixture;

/// Legacy rule to canonical text. Canonical input passes through validated.
pub fn translate_rule(raw: &str, as_json: bool) -> Result<String> {
    let rule = Rule::parse(raw)?;
    if as_json {
        return Ok(json!({ "rule": rule.text(), "dialect": detect_dialect(raw) }).to_string());
    }
    Ok(rule.text().to_string())
}

pub fn relations(raw: &str, as_json: bool) -> Result<String> {
    let rule = Rule::parse(raw)?;
    let found = relations_of(rule.text());
    if as_json {
        return Ok(json!({ "rule": rule.text(), "relations": found }).to_string());
    }
    Ok(found.join("\n"))
}

/// Show the plan and the SQL a collaborator would run for a rule.
pub fn plan(raw: &str, config: &EngineConfig, as_json: bool) -> Result<String> {
    let engine = GroupEngine::new(InMemoryBackend::new(), config.clone())?;
    let query = engine.explain(raw)?;
    let sql = query.to_sql();

    if as_json {
        return Ok(json!({
            "rule": query.rule().text(),
            "plan": query.shape(),
            "sql": sql,
            "warnings": query.warnings(),
        })
        .to_string());
    }

    let mut out = String::new();
    writeln!(out, "rule:   {}", query.rule().text())?;
    writeln!(out, "plan:   {}", describe_plan(query.shape()))?;
    writeln!(out, "sql:    {}", sql.sql)?;
    if !sql.params.is_empty() {
        let params: Vec<String> = sql.params.iter().map(ToString::to_string).collect();
        writeln!(out, "params: {}", params.join(", "))?;
    }
    for warning in query.warnings() {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(out.trim_end().to_string())
}

fn describe_plan(plan: &Plan) -> String {
    match plan {
        Plan::Empty => "empty (selects nothing)".to_string(),
        Plan::Single { relation } => format!("single {relation}"),
        Plan::Join { base, joins } => format!("join {base} <- {}", joins.join(", ")),
    }
}

/// Evaluate a rule against a fixture inventory and list the members.
pub async fn eval(raw: &str, fixture: Fixture, as_json: bool) -> Result<String> {
    let engine = fixture.into_engine().await?;
    let update = match engine.create(NewGroup::new("eval", raw)).await {
        Ok(update) => update,
        Err(EngineError::Configuration { source, .. }) => {
            anyhow::bail!("rule cannot be evaluated against this inventory: {source}")
        }
        Err(err) => return Err(err.into()),
    };
    let members = engine.members_of(update.group_id).await?;
    info!(members = members.len(), "Rule evaluated");

    if as_json {
        return Ok(json!({
            "rule": update.rule,
            "members": members,
            "warnings": update.warnings,
        })
        .to_string());
    }

    let mut out = String::new();
    for device in &members {
        writeln!(out, "{device}")?;
    }
    for warning in &update.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = include_str!("../fixtures/inventory.json");

    #[test]
    fn test_translate_legacy() {
        let out = translate_rule(r#"%devices.hostname ~ "core" &&"#, false).unwrap();
        assert_eq!(out, "devices.hostname LIKE('%core%')");
    }

    #[test]
    fn test_translate_canonical_passes_through() {
        let out = translate_rule("devices.status = 1", true).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["rule"], "devices.status = 1");
        assert_eq!(parsed["dialect"], "canonical");
    }

    #[test]
    fn test_translate_rejects_malformed() {
        assert!(translate_rule(r#"%devices.hostname ~ "core"#, false).is_err());
    }

    #[test]
    fn test_relations_listed_once() {
        let out = relations("ports.ifIndex = 1 AND devices.os = 'ios' OR ports.ifIndex = 2", false)
            .unwrap();
        assert_eq!(out, "ports\ndevices");
    }

    #[test]
    fn test_plan_join_shows_sql_and_params() {
        let out = plan(
            "devices.hostname LIKE('core%') AND ports.ifSpeed > 1000",
            &EngineConfig::default(),
            false,
        )
        .unwrap();
        assert!(out.contains("plan:   join devices <- ports"));
        assert!(out.contains("INNER JOIN ports ON ports.device_id = devices.device_id"));
        assert!(out.contains("params: 'core%', 1000"));
    }

    #[test]
    fn test_plan_constant_rule_warns() {
        let out = plan("1", &EngineConfig::default(), false).unwrap();
        assert!(out.contains("plan:   single devices"));
        assert!(out.contains("warning:"));
    }

    #[tokio::test]
    async fn test_eval_join_over_fixture() {
        let fixture = Fixture::from_json(INVENTORY).unwrap();
        let out = eval(
            "devices.hostname LIKE('core%') AND ports.ifSpeed >= 1000000000",
            fixture,
            false,
        )
        .await
        .unwrap();
        assert_eq!(out, "1\n2");
    }

    #[tokio::test]
    async fn test_eval_legacy_rule_json() {
        let fixture = Fixture::from_json(INVENTORY).unwrap();
        let out = eval(r#"%devices.os = "ios" && %devices.status = "1" &&"#, fixture, true)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["members"], json!([1]));
        assert_eq!(parsed["rule"], "devices.os = 'ios' AND devices.status = '1'");
    }

    #[tokio::test]
    async fn test_eval_unknown_relation_fails() {
        let fixture = Fixture::from_json(INVENTORY).unwrap();
        let err = eval("vlans.vlan_id = 10", fixture, false).await.unwrap_err();
        assert!(err.to_string().contains("vlans"));
    }
}
