// SPDX-License-Identifier: PMPL-1.0-or-later
//! Device Group Engine
//!
//! Keeps each dynamic device group's stored membership equal to what its
//! rule selects. A rule write is validated, planned from the relations it
//! names, evaluated against the relation rows, and reconciled against the
//! persisted associations in a single atomic batch.
//!
//! ```rust
//! use devgroup_engine::{row, EngineConfig, GroupEngine, NewGroup, RelationSchema};
//! use devgroup_rules::Value;
//! use devgroup_storage::InMemoryBackend;
//!
//! # tokio_test::block_on(async {
//! let engine = GroupEngine::new(InMemoryBackend::new(), EngineConfig::default()).unwrap();
//! let relations = engine.relations();
//! relations
//!     .define_relation(RelationSchema::new("devices", ["device_id", "hostname"]))
//!     .await
//!     .unwrap();
//! relations
//!     .insert_row("devices", row([("device_id", Value::Int(1)), ("hostname", Value::text("core-1"))]))
//!     .await
//!     .unwrap();
//!
//! let created = engine
//!     .create(NewGroup::new("core", r#"%devices.hostname ~ "core" &&"#))
//!     .await
//!     .unwrap();
//! assert_eq!(created.rule, "devices.hostname LIKE('%core%')");
//! assert_eq!(engine.member_count(created.group_id).await.unwrap(), 1);
//! # });
//! ```

pub mod access;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod lock;
pub mod metrics;
pub mod query;
pub mod reconcile;

pub use access::{AccessGate, AllowAll, AllowList};
pub use catalog::{row, Catalog, RelationSchema, RelationStore, Row};
pub use config::EngineConfig;
pub use engine::GroupEngine;
pub use error::{ConfigError, EngineError};
pub use group::{
    DeviceId, Group, GroupId, GroupRow, GroupSummary, MigrationOutcome, NewGroup, RuleUpdate,
    RuleWarning,
};
pub use lock::GroupLocks;
pub use metrics::EngineMetrics;
pub use query::{MembershipQuery, Plan};
pub use reconcile::{MembershipDelta, ReconcileReport, Reconciler};
