// SPDX-License-Identifier: PMPL-1.0-or-later
//! Per-group serialization of mutations.
//!
//! Each group has its own async mutex. Two mutations of the same group never
//! interleave their evaluate-then-write sequence; mutations of different
//! groups proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::group::GroupId;

/// Held while a group is being mutated.
pub type GroupGuard = OwnedMutexGuard<()>;

#[derive(Debug, Clone, Default)]
pub struct GroupLocks {
    table: Arc<Mutex<HashMap<GroupId, Arc<AsyncMutex<()>>>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, group: GroupId) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        table.entry(group).or_default().clone()
    }

    /// Wait for `group`'s lock, `timeout` per attempt, `retries` extra
    /// attempts. Exhausting them yields [`EngineError::Conflict`].
    pub async fn acquire(
        &self,
        group: GroupId,
        timeout: Duration,
        retries: u32,
    ) -> Result<GroupGuard, EngineError> {
        let slot = self.slot(group);
        let attempts = retries.saturating_add(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, slot.clone().lock_owned()).await {
                Ok(guard) => {
                    debug!(group = %group, attempt, "group lock acquired");
                    return Ok(guard);
                }
                Err(_) => {
                    warn!(group = %group, attempt, timeout_ms = timeout.as_millis() as u64, "group lock wait timed out");
                }
            }
        }
        Err(EngineError::Conflict {
            group_id: group,
            attempts,
        })
    }

    /// Drop the lock slot of a deleted group.
    pub fn forget(&self, group: GroupId) {
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        table.remove(&group);
    }

    /// Number of groups with a lock slot.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
