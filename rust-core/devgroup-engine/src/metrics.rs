// SPDX-License-Identifier: PMPL-1.0-or-later
//! Prometheus counters for group maintenance.

use prometheus::{IntCounter, Registry};

use crate::error::EngineError;

#[derive(Clone)]
pub struct EngineMetrics {
    pub reconciliations: IntCounter,
    pub members_added: IntCounter,
    pub members_removed: IntCounter,
    pub stale_marks: IntCounter,
    pub conflicts: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, EngineError> {
    let counter = IntCounter::new(name, help).map_err(|e| EngineError::Metrics(e.to_string()))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| EngineError::Metrics(e.to_string()))?;
    Ok(counter)
}

impl EngineMetrics {
    pub fn register(registry: &Registry) -> Result<Self, EngineError> {
        Ok(Self {
            reconciliations: counter(
                registry,
                "devgroup_reconciliations_total",
                "Membership reconciliations that wrote a delta",
            )?,
            members_added: counter(
                registry,
                "devgroup_members_added_total",
                "Devices added to groups",
            )?,
            members_removed: counter(
                registry,
                "devgroup_members_removed_total",
                "Devices removed from groups",
            )?,
            stale_marks: counter(
                registry,
                "devgroup_stale_marks_total",
                "Groups flagged stale after a rule could not be evaluated",
            )?,
            conflicts: counter(
                registry,
                "devgroup_lock_conflicts_total",
                "Group mutations abandoned on lock timeout",
            )?,
        })
    }

    pub(crate) fn record_delta(&self, added: usize, removed: usize) {
        if added == 0 && removed == 0 {
            return;
        }
        self.reconciliations.inc();
        self.members_added.inc_by(added as u64);
        self.members_removed.inc_by(removed as u64);
    }
}
