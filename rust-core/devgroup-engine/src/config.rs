// SPDX-License-Identifier: PMPL-1.0-or-later
//! Engine configuration.
//!
//! Defaults describe the monitoring console's schema: entities live in
//! `devices` and every satellite relation joins on `device_id`.

use std::time::Duration;

use devgroup_rules::is_identifier;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Configuration for a [`GroupEngine`](crate::GroupEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Relation every join starts from.
    pub base_relation: String,
    /// Column shared by all relations that identifies the entity.
    pub id_column: String,
    /// How long a mutation waits for its group's lock per attempt.
    pub lock_timeout_ms: u64,
    /// Extra attempts after the first lock timeout before reporting a conflict.
    pub conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_relation: "devices".to_string(),
            id_column: "device_id".to_string(),
            lock_timeout_ms: 5_000,
            conflict_retries: 1,
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DEVGROUP_*` environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let mut config = Self::default();
        if let Some(v) = lookup("DEVGROUP_BASE_RELATION") {
            config.base_relation = v;
        }
        if let Some(v) = lookup("DEVGROUP_ID_COLUMN") {
            config.id_column = v;
        }
        if let Some(v) = lookup("DEVGROUP_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = v.parse().map_err(|_| {
                EngineError::InvalidConfig(format!("DEVGROUP_LOCK_TIMEOUT_MS: '{v}' is not a number"))
            })?;
        }
        if let Some(v) = lookup("DEVGROUP_CONFLICT_RETRIES") {
            config.conflict_retries = v.parse().map_err(|_| {
                EngineError::InvalidConfig(format!("DEVGROUP_CONFLICT_RETRIES: '{v}' is not a number"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !is_identifier(&self.base_relation) {
            return Err(EngineError::InvalidConfig(format!(
                "base_relation '{}' is not an identifier",
                self.base_relation
            )));
        }
        if !is_identifier(&self.id_column) {
            return Err(EngineError::InvalidConfig(format!(
                "id_column '{}' is not an identifier",
                self.id_column
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "lock_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
