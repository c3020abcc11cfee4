// SPDX-License-Identifier: PMPL-1.0-or-later
//! The group record service.
//!
//! Every mutation of a group runs under that group's lock and ends in one
//! storage batch holding the group row together with its membership delta,
//! so readers see either the old rule and members or the new ones.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use devgroup_rules::{canonicalize, translate, Dialect, Rule};
use devgroup_storage::{padded_id, BatchOp, StorageBackend, StorageError, TypedStore};
use futures::future::try_join_all;
use prometheus::Registry;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::access::AccessGate;
use crate::catalog::RelationStore;
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError};
use crate::group::{
    DeviceId, Group, GroupId, GroupRow, GroupSummary, MigrationOutcome, NewGroup, RuleUpdate,
};
use crate::lock::{GroupGuard, GroupLocks};
use crate::metrics::EngineMetrics;
use crate::query::MembershipQuery;
use crate::reconcile::{MembershipDelta, Reconciler};

const GROUP_SEQ: &str = "group_seq";

enum Evaluation {
    Members(BTreeSet<DeviceId>),
    Misconfigured(ConfigError),
}

/// Dynamic device groups over a storage backend.
#[derive(Clone)]
pub struct GroupEngine<B: StorageBackend + Clone> {
    config: EngineConfig,
    groups: TypedStore<B>,
    meta: TypedStore<B>,
    relations: RelationStore<B>,
    reconciler: Reconciler<B>,
    locks: GroupLocks,
    id_alloc: Arc<Mutex<()>>,
    metrics: Option<EngineMetrics>,
}

impl<B: StorageBackend + Clone> GroupEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            groups: TypedStore::new(backend.clone(), "groups"),
            meta: TypedStore::new(backend.clone(), "meta"),
            relations: RelationStore::new(backend.clone(), &config.id_column),
            reconciler: Reconciler::new(backend),
            locks: GroupLocks::new(),
            id_alloc: Arc::new(Mutex::new(())),
            metrics: None,
            config,
        })
    }

    /// Register Prometheus counters.
    pub fn with_prometheus(mut self, registry: Registry) -> Result<Self, EngineError> {
        self.metrics = Some(EngineMetrics::register(&registry)?);
        Ok(self)
    }

    pub fn metrics(&self) -> Option<&EngineMetrics> {
        self.metrics.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Relation catalog and rows the rules are evaluated against.
    pub fn relations(&self) -> &RelationStore<B> {
        &self.relations
    }

    async fn lock(&self, id: GroupId) -> Result<GroupGuard, EngineError> {
        let result = self
            .locks
            .acquire(id, self.config.lock_timeout(), self.config.conflict_retries)
            .await;
        if let (Err(_), Some(metrics)) = (&result, &self.metrics) {
            metrics.conflicts.inc();
        }
        result
    }

    async fn load(&self, id: GroupId) -> Result<GroupRow, EngineError> {
        self.groups
            .get(&padded_id(id.0))
            .await?
            .ok_or(EngineError::GroupNotFound(id))
    }

    /// Highest id among stored rows, counting rows written before the id
    /// sequence existed.
    async fn highest_stored_id(&self) -> Result<u64, EngineError> {
        let keys = self.groups.scan_keys("").await?;
        let Some(key) = keys.last() else {
            return Ok(0);
        };
        key.parse().map_err(|_| {
            StorageError::CorruptedData(format!("group key '{key}' is not a numeric id")).into()
        })
    }

    fn to_group(row: GroupRow) -> Result<Group, EngineError> {
        let stored_dialect = row.dialect();
        let rule = canonicalize(&row.rule)?.into_owned();
        Ok(Group {
            id: row.id,
            name: row.name,
            description: row.description,
            rule,
            stored_dialect,
            stale: row.stale,
            reconciled_at: row.reconciled_at,
        })
    }

    /// Plan a rule without touching any group.
    pub fn explain(&self, raw: &str) -> Result<MembershipQuery, EngineError> {
        let rule = Rule::parse(raw)?;
        Ok(MembershipQuery::plan(&self.config, &rule))
    }

    async fn evaluate(&self, rule: &Rule) -> Result<(MembershipQuery, Evaluation), EngineError> {
        let query = MembershipQuery::plan(&self.config, rule);
        let catalog = self.relations.catalog().await?;
        if let Err(error) = query.validate(&catalog) {
            return Ok((query, Evaluation::Misconfigured(error)));
        }
        let members = query.execute(&self.relations).await?;
        Ok((query, Evaluation::Members(members)))
    }

    /// Evaluate `rule` for `row` and write row and membership delta in one
    /// batch together with `ops`. Nothing is written when neither changed.
    async fn commit(
        &self,
        previous: Option<&GroupRow>,
        mut row: GroupRow,
        rule: &Rule,
        mut ops: Vec<BatchOp>,
    ) -> Result<RuleUpdate, EngineError> {
        let id = row.id;
        let key = padded_id(id.0);
        let (query, evaluation) = self.evaluate(rule).await?;

        let desired = match evaluation {
            Evaluation::Members(desired) => desired,
            Evaluation::Misconfigured(source) => {
                row.stale = true;
                if previous != Some(&row) {
                    ops.push(self.groups.put_op(&key, &row)?);
                }
                self.groups.apply(&ops).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.stale_marks.inc();
                }
                warn!(group = %id, error = %source, "rule stored, membership left unchanged");
                return Err(EngineError::Configuration {
                    group_id: id,
                    source,
                });
            }
        };

        let current = self.reconciler.current(id).await?;
        let delta = MembershipDelta::between(&current, &desired);
        row.stale = false;
        if previous != Some(&row) || !delta.is_empty() {
            row.reconciled_at = Some(Utc::now());
            ops.push(self.groups.put_op(&key, &row)?);
            ops.extend(self.reconciler.delta_ops(id, &delta)?);
        }
        self.groups.apply(&ops).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_delta(delta.to_add.len(), delta.to_remove.len());
        }
        info!(
            group = %id,
            added = delta.to_add.len(),
            removed = delta.to_remove.len(),
            members = desired.len(),
            "group membership committed"
        );

        Ok(RuleUpdate {
            group_id: id,
            rule: rule.text().to_string(),
            plan: query.shape().clone(),
            added: delta.to_add.len(),
            removed: delta.to_remove.len(),
            member_count: desired.len(),
            warnings: query.warnings().to_vec(),
        })
    }

    /// Create a group and compute its initial membership.
    ///
    /// A rule that does not parse is rejected before an id is allocated.
    /// Ids continue after both the sequence and any stored row, so a row
    /// imported without a sequence entry is never overwritten.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(&self, new: NewGroup) -> Result<RuleUpdate, EngineError> {
        let rule = Rule::parse(&new.rule)?;

        // Held until commit so ids are never handed out twice.
        let _alloc = self.id_alloc.lock().await;
        let last = self.meta.get::<u64>(GROUP_SEQ).await?.unwrap_or(0);
        let id = GroupId(last.max(self.highest_stored_id().await?) + 1);
        let _guard = self.lock(id).await?;

        let row = GroupRow {
            id,
            name: new.name,
            description: new.description,
            rule: rule.text().to_string(),
            stale: false,
            reconciled_at: None,
        };
        let ops = vec![self.meta.put_op(GROUP_SEQ, &id.0)?];
        self.commit(None, row, &rule, ops).await
    }

    /// The group with its rule in canonical form.
    pub async fn get(&self, id: GroupId) -> Result<Group, EngineError> {
        Self::to_group(self.load(id).await?)
    }

    /// Canonical rule text. Legacy rules are translated in memory only.
    pub async fn get_rule(&self, id: GroupId) -> Result<String, EngineError> {
        Ok(self.get(id).await?.rule)
    }

    /// Replace the rule and reconcile membership.
    ///
    /// Legacy input is translated and stored canonical. A malformed rule
    /// leaves the group untouched.
    #[instrument(skip(self, raw), fields(group = %id))]
    pub async fn set_rule(&self, id: GroupId, raw: &str) -> Result<RuleUpdate, EngineError> {
        let rule = Rule::parse(raw)?;
        let _guard = self.lock(id).await?;
        let previous = self.load(id).await?;
        let mut row = previous.clone();
        row.rule = rule.text().to_string();
        self.commit(Some(&previous), row, &rule, Vec::new()).await
    }

    /// Re-evaluate the stored rule against current relation rows.
    #[instrument(skip(self), fields(group = %id))]
    pub async fn refresh(&self, id: GroupId) -> Result<RuleUpdate, EngineError> {
        let _guard = self.lock(id).await?;
        let previous = self.load(id).await?;
        let rule = Rule::parse(&previous.rule)?;
        self.commit(Some(&previous), previous.clone(), &rule, Vec::new())
            .await
    }

    /// Change name and description; membership is not touched.
    pub async fn update_details(
        &self,
        id: GroupId,
        name: &str,
        description: &str,
    ) -> Result<Group, EngineError> {
        let _guard = self.lock(id).await?;
        let mut row = self.load(id).await?;
        row.name = name.to_string();
        row.description = description.to_string();
        self.groups.put(&padded_id(id.0), &row).await?;
        Self::to_group(row)
    }

    /// Delete the group and all of its associations. Returns how many
    /// associations were removed.
    #[instrument(skip(self), fields(group = %id))]
    pub async fn delete(&self, id: GroupId) -> Result<usize, EngineError> {
        let guard = self.lock(id).await?;
        self.load(id).await?;

        let mut ops = self.reconciler.clear_ops(id).await?;
        let removed = ops.len();
        ops.push(self.groups.delete_op(&padded_id(id.0)));
        self.groups.apply(&ops).await?;

        drop(guard);
        self.locks.forget(id);
        info!(group = %id, removed, "group deleted");
        Ok(removed)
    }

    pub async fn members_of(&self, id: GroupId) -> Result<BTreeSet<DeviceId>, EngineError> {
        self.load(id).await?;
        Ok(self.reconciler.current(id).await?)
    }

    pub async fn member_count(&self, id: GroupId) -> Result<usize, EngineError> {
        self.load(id).await?;
        Ok(self.reconciler.count(id).await?)
    }

    /// Members the caller may see.
    pub async fn visible_members(
        &self,
        id: GroupId,
        gate: &dyn AccessGate,
    ) -> Result<Vec<DeviceId>, EngineError> {
        let members = self.members_of(id).await?;
        Ok(members.into_iter().filter(|d| gate.can_view(*d)).collect())
    }

    /// All groups with member counts, in id order.
    pub async fn list(&self) -> Result<Vec<GroupSummary>, EngineError> {
        let rows: Vec<(String, GroupRow)> = self.groups.scan_prefix("", usize::MAX).await?;
        let counts = try_join_all(rows.iter().map(|(_, row)| self.reconciler.count(row.id))).await?;

        Ok(rows
            .into_iter()
            .zip(counts)
            .map(|((_, row), member_count)| GroupSummary {
                id: row.id,
                name: row.name,
                description: row.description,
                member_count,
                stale: row.stale,
            })
            .collect())
    }

    /// Rewrite a legacy stored rule in canonical form.
    #[instrument(skip(self), fields(group = %id))]
    pub async fn migrate_persisted(&self, id: GroupId) -> Result<MigrationOutcome, EngineError> {
        let _guard = self.lock(id).await?;
        let mut row = self.load(id).await?;
        if row.dialect() == Dialect::Canonical {
            return Ok(MigrationOutcome::AlreadyCanonical);
        }

        let canonical = translate(&row.rule)?;
        let from = std::mem::replace(&mut row.rule, canonical.clone());
        self.groups.put(&padded_id(id.0), &row).await?;
        info!(group = %id, %from, to = %canonical, "legacy rule migrated");
        Ok(MigrationOutcome::Migrated {
            from,
            to: canonical,
        })
    }

    /// Migrate every group whose stored rule is legacy. Returns the groups
    /// that were rewritten and those whose rule does not translate; a bad
    /// rule does not stop the sweep. Storage failures do.
    pub async fn migrate_all(&self) -> Result<Vec<(GroupId, MigrationOutcome)>, EngineError> {
        let rows: Vec<(String, GroupRow)> = self.groups.scan_prefix("", usize::MAX).await?;
        let mut outcomes = Vec::new();
        for (_, row) in rows {
            if row.dialect() != Dialect::Legacy {
                continue;
            }
            match self.migrate_persisted(row.id).await {
                Ok(MigrationOutcome::AlreadyCanonical) | Err(EngineError::GroupNotFound(_)) => {}
                Ok(outcome) => outcomes.push((row.id, outcome)),
                Err(EngineError::Rule(error)) => {
                    warn!(group = %row.id, rule = %row.rule, %error, "legacy rule not migrated");
                    outcomes.push((
                        row.id,
                        MigrationOutcome::Failed {
                            rule: row.rule,
                            error,
                        },
                    ));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(outcomes)
    }
}
