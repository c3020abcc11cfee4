// SPDX-License-Identifier: PMPL-1.0-or-later
//! Relation catalog and row storage.
//!
//! Every relation is registered with its column set before rows are
//! written. Rows are keyed `rows:{relation}:{device}:{seq}` so that a
//! prefix scan returns one relation's rows already grouped by entity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use devgroup_rules::{is_identifier, Value};
use devgroup_storage::{padded_id, StorageBackend, StorageError, TypedStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ConfigError, EngineError};
use crate::group::DeviceId;

/// One relation row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Name and columns of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSchema {
    pub name: String,
    pub columns: BTreeSet<String>,
}

impl RelationSchema {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    fn check_identifiers(&self) -> Result<(), ConfigError> {
        for name in std::iter::once(&self.name).chain(self.columns.iter()) {
            if !is_identifier(name) {
                return Err(ConfigError::InvalidIdentifier { name: name.clone() });
            }
        }
        Ok(())
    }
}

/// Snapshot of all registered relation schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    relations: BTreeMap<String, RelationSchema>,
}

impl Catalog {
    pub fn get(&self, relation: &str) -> Option<&RelationSchema> {
        self.relations.get(relation)
    }

    pub fn insert(&mut self, schema: RelationSchema) {
        self.relations.insert(schema.name.clone(), schema);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationSchema> {
        self.relations.values()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

impl FromIterator<RelationSchema> for Catalog {
    fn from_iter<T: IntoIterator<Item = RelationSchema>>(iter: T) -> Self {
        let mut catalog = Catalog::default();
        for schema in iter {
            catalog.insert(schema);
        }
        catalog
    }
}

/// Relation schemas and rows over a storage backend.
#[derive(Clone)]
pub struct RelationStore<B: StorageBackend + Clone> {
    schemas: TypedStore<B>,
    rows: TypedStore<B>,
    meta: TypedStore<B>,
    id_column: String,
    write_lock: Arc<Mutex<()>>,
}

impl<B: StorageBackend + Clone> RelationStore<B> {
    pub fn new(backend: B, id_column: &str) -> Self {
        Self {
            schemas: TypedStore::new(backend.clone(), "catalog"),
            rows: TypedStore::new(backend.clone(), "rows"),
            meta: TypedStore::new(backend, "meta"),
            id_column: id_column.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Register or replace a relation schema.
    pub async fn define_relation(&self, schema: RelationSchema) -> Result<(), EngineError> {
        schema.check_identifiers()?;
        debug!(relation = %schema.name, columns = schema.columns.len(), "defining relation");
        self.schemas.put(&schema.name, &schema).await?;
        Ok(())
    }

    pub async fn schema(&self, relation: &str) -> Result<Option<RelationSchema>, StorageError> {
        self.schemas.get(relation).await
    }

    pub async fn catalog(&self) -> Result<Catalog, StorageError> {
        let entries: Vec<(String, RelationSchema)> = self.schemas.scan_prefix("", usize::MAX).await?;
        Ok(entries.into_iter().map(|(_, schema)| schema).collect())
    }

    /// Insert a row, returning the entity it belongs to.
    ///
    /// Every column must be part of the relation's schema and the identifier
    /// column must hold a non-negative integer.
    pub async fn insert_row(&self, relation: &str, row: Row) -> Result<DeviceId, EngineError> {
        let schema = self.schema(relation).await?.ok_or_else(|| {
            ConfigError::UnresolvableRelation {
                relation: relation.to_string(),
                reason: "not registered in the catalog".to_string(),
            }
        })?;
        if let Some(column) = row.keys().find(|c| !schema.has_column(c)) {
            return Err(ConfigError::UnknownColumn {
                relation: relation.to_string(),
                column: column.clone(),
            }
            .into());
        }
        let device = row
            .get(&self.id_column)
            .and_then(Value::as_id)
            .map(DeviceId)
            .ok_or_else(|| ConfigError::MissingEntityId {
                relation: relation.to_string(),
                column: self.id_column.clone(),
            })?;

        let _guard = self.write_lock.lock().await;
        let seq_key = format!("row_seq:{relation}");
        let seq: u64 = self.meta.get::<u64>(&seq_key).await?.unwrap_or(0) + 1;
        let key = format!("{relation}:{}:{}", padded_id(device.0), padded_id(seq));
        let ops = vec![self.rows.put_op(&key, &row)?, self.meta.put_op(&seq_key, &seq)?];
        self.rows.apply(&ops).await?;
        Ok(device)
    }

    /// Remove every row of `relation` belonging to `device`.
    pub async fn delete_rows(&self, relation: &str, device: DeviceId) -> Result<usize, EngineError> {
        let prefix = format!("{relation}:{}:", padded_id(device.0));
        let keys = self.rows.scan_keys(&prefix).await?;
        let ops: Vec<_> = keys.iter().map(|k| self.rows.delete_op(k)).collect();
        self.rows.apply(&ops).await?;
        Ok(keys.len())
    }

    /// All rows of `relation` grouped by entity.
    pub async fn rows_by_device(
        &self,
        relation: &str,
    ) -> Result<BTreeMap<DeviceId, Vec<Row>>, StorageError> {
        let entries: Vec<(String, Row)> =
            self.rows.scan_prefix(&format!("{relation}:"), usize::MAX).await?;

        let mut grouped: BTreeMap<DeviceId, Vec<Row>> = BTreeMap::new();
        for (key, row) in entries {
            let device = key
                .split(':')
                .nth(1)
                .and_then(|d| d.parse::<u64>().ok())
                .map(DeviceId)
                .ok_or_else(|| StorageError::CorruptedData(format!("bad row key '{key}'")))?;
            grouped.entry(device).or_default().push(row);
        }
        Ok(grouped)
    }

    pub async fn rows_for(&self, relation: &str, device: DeviceId) -> Result<Vec<Row>, StorageError> {
        let prefix = format!("{relation}:{}:", padded_id(device.0));
        let entries: Vec<(String, Row)> = self.rows.scan_prefix(&prefix, usize::MAX).await?;
        Ok(entries.into_iter().map(|(_, row)| row).collect())
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row<I, K, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
