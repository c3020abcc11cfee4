// SPDX-License-Identifier: PMPL-1.0-or-later
//! Engine error types.

use devgroup_rules::RuleError;
use devgroup_storage::StorageError;
use thiserror::Error;

use crate::group::GroupId;

/// A rule that parses but cannot be resolved against the relation catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("relation '{relation}' cannot be resolved: {reason}")]
    UnresolvableRelation { relation: String, reason: String },

    #[error("unknown column '{relation}.{column}'")]
    UnknownColumn { relation: String, column: String },

    #[error("'{name}' is not a valid identifier")]
    InvalidIdentifier { name: String },

    #[error("row for relation '{relation}' has no usable '{column}' value")]
    MissingEntityId { relation: String, column: String },
}

/// Errors returned by [`GroupEngine`](crate::GroupEngine) operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The rule text is malformed. Nothing was persisted.
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),

    /// The rule was stored but membership could not be computed; the group
    /// is flagged stale and its previous membership is kept.
    #[error("group {group_id} rule cannot be evaluated: {source}")]
    Configuration {
        group_id: GroupId,
        #[source]
        source: ConfigError,
    },

    /// Catalog maintenance failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] ConfigError),

    /// The group's serialization point was not obtained in time.
    #[error("group {group_id} is busy, gave up after {attempts} attempts")]
    Conflict { group_id: GroupId, attempts: u32 },

    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("metrics registration failed: {0}")]
    Metrics(String),
}

impl EngineError {
    /// Worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Conflict { .. } => true,
            EngineError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }

    /// The caller supplied a bad rule.
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Rule(_))
    }
}
