// SPDX-License-Identifier: PMPL-1.0-or-later
//! Membership reconciliation.
//!
//! Associations live under `group_device:{group}:{device}`. Reconciling a
//! group against a desired set writes only the difference, as a single
//! atomic batch, and writes nothing at all when the sets already agree.

use std::collections::BTreeSet;

use devgroup_storage::{padded_id, BatchOp, StorageBackend, StorageError, TypedStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::group::{DeviceId, GroupId};

/// Value stored for each association key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: GroupId,
    pub device_id: DeviceId,
}

/// Additions and removals that turn one membership set into another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDelta {
    pub to_add: BTreeSet<DeviceId>,
    pub to_remove: BTreeSet<DeviceId>,
}

impl MembershipDelta {
    pub fn between(current: &BTreeSet<DeviceId>, desired: &BTreeSet<DeviceId>) -> Self {
        Self {
            to_add: desired.difference(current).copied().collect(),
            to_remove: current.difference(desired).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub group_id: GroupId,
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

#[derive(Clone)]
pub struct Reconciler<B: StorageBackend + Clone> {
    members: TypedStore<B>,
}

impl<B: StorageBackend + Clone> Reconciler<B> {
    pub fn new(backend: B) -> Self {
        Self {
            members: TypedStore::new(backend, "group_device"),
        }
    }

    fn key(group: GroupId, device: DeviceId) -> String {
        format!("{}:{}", padded_id(group.0), padded_id(device.0))
    }

    fn group_prefix(group: GroupId) -> String {
        format!("{}:", padded_id(group.0))
    }

    /// Persisted members of `group`.
    pub async fn current(&self, group: GroupId) -> Result<BTreeSet<DeviceId>, StorageError> {
        let keys = self.members.scan_keys(&Self::group_prefix(group)).await?;
        keys.iter()
            .map(|key| {
                key.rsplit(':')
                    .next()
                    .and_then(|d| d.parse::<u64>().ok())
                    .map(DeviceId)
                    .ok_or_else(|| {
                        StorageError::CorruptedData(format!("bad membership key '{key}'"))
                    })
            })
            .collect()
    }

    /// Number of persisted members, counted from keys alone.
    pub async fn count(&self, group: GroupId) -> Result<usize, StorageError> {
        self.members.count_prefix(&Self::group_prefix(group)).await
    }

    /// Batch operations applying `delta` to `group`.
    pub fn delta_ops(
        &self,
        group: GroupId,
        delta: &MembershipDelta,
    ) -> Result<Vec<BatchOp>, StorageError> {
        let mut ops = Vec::with_capacity(delta.to_add.len() + delta.to_remove.len());
        for &device in &delta.to_add {
            let record = Membership {
                group_id: group,
                device_id: device,
            };
            ops.push(self.members.put_op(&Self::key(group, device), &record)?);
        }
        for &device in &delta.to_remove {
            ops.push(self.members.delete_op(&Self::key(group, device)));
        }
        Ok(ops)
    }

    /// Batch operations removing every association of `group`.
    pub async fn clear_ops(&self, group: GroupId) -> Result<Vec<BatchOp>, StorageError> {
        let current = self.current(group).await?;
        Ok(current
            .into_iter()
            .map(|device| self.members.delete_op(&Self::key(group, device)))
            .collect())
    }

    /// Bring the persisted members of `group` in line with `desired`.
    pub async fn reconcile(
        &self,
        group: GroupId,
        desired: &BTreeSet<DeviceId>,
    ) -> Result<ReconcileReport, StorageError> {
        let current = self.current(group).await?;
        let delta = MembershipDelta::between(&current, desired);
        let report = ReconcileReport {
            group_id: group,
            added: delta.to_add.len(),
            removed: delta.to_remove.len(),
            unchanged: current.len() - delta.to_remove.len(),
        };

        if delta.is_empty() {
            debug!(group = %group, members = current.len(), "membership already in sync");
            return Ok(report);
        }

        let ops = self.delta_ops(group, &delta)?;
        self.members.apply(&ops).await?;
        info!(
            group = %group,
            added = report.added,
            removed = report.removed,
            "membership reconciled"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use devgroup_storage::{InMemoryBackend, MetricsBackend};

    use super::*;

    fn ids(raw: &[u64]) -> BTreeSet<DeviceId> {
        raw.iter().copied().map(DeviceId).collect()
    }

    #[test]
    fn test_delta_leaves_intersection_alone() {
        let delta = MembershipDelta::between(&ids(&[1, 2, 3]), &ids(&[2, 3, 4]));
        assert_eq!(delta.to_add, ids(&[4]));
        assert_eq!(delta.to_remove, ids(&[1]));
        assert!(MembershipDelta::between(&ids(&[5]), &ids(&[5])).is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_applies_delta() {
        let reconciler = Reconciler::new(InMemoryBackend::new());
        let g = GroupId(1);

        let first = reconciler.reconcile(g, &ids(&[1, 2])).await.unwrap();
        assert_eq!((first.added, first.removed, first.unchanged), (2, 0, 0));

        let second = reconciler.reconcile(g, &ids(&[2, 3])).await.unwrap();
        assert_eq!((second.added, second.removed, second.unchanged), (1, 1, 1));
        assert_eq!(reconciler.current(g).await.unwrap(), ids(&[2, 3]));
        assert_eq!(reconciler.count(g).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_second_reconcile_writes_nothing() {
        let backend = MetricsBackend::new(InMemoryBackend::new());
        let reconciler = Reconciler::new(backend.clone());
        let g = GroupId(9);

        reconciler.reconcile(g, &ids(&[3, 4, 5])).await.unwrap();
        backend.reset_stats();

        let report = reconciler.reconcile(g, &ids(&[3, 4, 5])).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(backend.stats().writes(), 0);
    }

    #[tokio::test]
    async fn test_groups_do_not_share_members() {
        let reconciler = Reconciler::new(InMemoryBackend::new());
        reconciler.reconcile(GroupId(1), &ids(&[1])).await.unwrap();
        reconciler.reconcile(GroupId(10), &ids(&[2])).await.unwrap();
        assert_eq!(reconciler.current(GroupId(1)).await.unwrap(), ids(&[1]));

        let ops = reconciler.clear_ops(GroupId(10)).await.unwrap();
        assert_eq!(ops.len(), 1);
    }
}
