// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device group storage.
//
// Everything the group engine persists (group rows, membership markers,
// relation schemas, relation rows and counters) goes through the
// `StorageBackend` trait defined here. The engine only ever sees the trait.
//
// - [`backend`]: the trait and the `BatchOp` unit of atomic writes
// - [`memory`]: ordered in-memory backend
// - [`redb_backend`]: single-file persistent backend (`redb-backend` feature)
// - [`typed`]: namespaced JSON records and staged batches
// - [`metrics`]: counting wrapper used to assert write behaviour
//
// ```rust
// use devgroup_storage::{InMemoryBackend, MetricsBackend, TypedStore};
//
// # tokio_test::block_on(async {
// let metered = MetricsBackend::new(InMemoryBackend::new());
// let groups = TypedStore::new(metered.clone(), "groups");
// let members = TypedStore::new(metered.clone(), "group_device");
//
// let ops = vec![
//     groups.put_op("1", &serde_json::json!({"name": "core"})).unwrap(),
//     members.put_op("1:7", &()).unwrap(),
// ];
// groups.apply(&ops).await.unwrap();
//
// assert_eq!(members.count_prefix("1:").await.unwrap(), 1);
// assert_eq!(metered.stats().writes(), 2);
// # });
// ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod typed;

#[cfg(feature = "redb-backend")]
pub mod redb_backend;

pub use backend::{BatchOp, StorageBackend};
pub use error::StorageError;
pub use memory::InMemoryBackend;
pub use metrics::{BackendStats, MetricsBackend};
pub use typed::{padded_id, TypedStore};

#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
