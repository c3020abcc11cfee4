// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent group store on redb.
//
// One single-file database with one table holding every namespace. Reads run
// in read transactions (snapshots); every mutation, batch or not, is one
// write transaction, so a rule write plus its membership delta commits or
// aborts as a unit. redb is synchronous, so each call runs on the blocking
// pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use tracing::debug;

use crate::backend::{check_key, BatchOp, StorageBackend};
use crate::error::StorageError;

const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

type Records = redb::ReadOnlyTable<&'static [u8], &'static [u8]>;

fn unavailable<E: Into<redb::Error>>(context: &'static str) -> impl Fn(E) -> StorageError {
    move |err| StorageError::BackendUnavailable(format!("{context}: {}", err.into()))
}

fn corrupted<E: Into<redb::Error>>(context: &'static str) -> impl Fn(E) -> StorageError {
    move |err| StorageError::CorruptedData(format!("{context}: {}", err.into()))
}

/// A redb database shared by all clones.
///
/// ```rust,no_run
/// use devgroup_storage::redb_backend::RedbBackend;
/// use devgroup_storage::typed::TypedStore;
///
/// # tokio_test::block_on(async {
/// let backend = RedbBackend::open("/var/lib/devgroup/groups.redb").unwrap();
/// let groups = TypedStore::new(backend, "groups");
/// groups.put("00000000000000000001", &"core").await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbBackend {
    /// Open the database at `path`, creating it and its parent directories
    /// when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(|err| {
            StorageError::BackendUnavailable(format!("opening {}: {err}", path.display()))
        })?;
        debug!(path = %path.display(), "Opened redb group store");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `work` against the database on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || work(&db))
            .await
            .map_err(|err| StorageError::BackendUnavailable(format!("blocking task: {err}")))?
    }

    /// The records table in a fresh snapshot; `None` until the first write
    /// creates it.
    fn snapshot(db: &Database) -> Result<Option<Records>, StorageError> {
        let txn = db.begin_read().map_err(unavailable("read txn"))?;
        match txn.open_table(RECORDS) {
            Ok(table) => Ok(Some(table)),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(err) => Err(unavailable("open table")(err)),
        }
    }

    /// Visit entries under `prefix` in key order until `visit` returns false.
    fn scan(
        db: &Database,
        prefix: &[u8],
        mut visit: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<(), StorageError> {
        let Some(table) = Self::snapshot(db)? else {
            return Ok(());
        };

        let range = table.range(prefix..).map_err(corrupted("range"))?;
        for entry in range {
            let (key, value) = entry.map_err(corrupted("range entry"))?;
            if !key.value().starts_with(prefix) || !visit(key.value(), value.value()) {
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").field("path", &self.path).finish()
    }
}

#[async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_vec();
        self.blocking(move |db| {
            let Some(table) = Self::snapshot(db)? else {
                return Ok(None);
            };
            let value = table.get(key.as_slice()).map_err(corrupted("get"))?;
            Ok(value.map(|guard| guard.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.apply_batch(&[BatchOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(unavailable("write txn"))?;
            let existed = {
                let mut table = txn
                    .open_table(RECORDS)
                    .map_err(unavailable("open table"))?;
                let removed = table
                    .remove(key.as_slice())
                    .map_err(corrupted("remove"))?;
                removed.is_some()
            };
            txn.commit().map_err(corrupted("commit"))?;
            Ok(existed)
        })
        .await
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let prefix = prefix.to_vec();
        self.blocking(move |db| {
            let mut entries = Vec::new();
            Self::scan(db, &prefix, |k, v| {
                entries.push((k.to_vec(), v.to_vec()));
                entries.len() < limit
            })?;
            Ok(entries)
        })
        .await
    }

    async fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StorageError> {
        let prefix = prefix.to_vec();
        self.blocking(move |db| {
            let mut count = 0;
            Self::scan(db, &prefix, |_, _| {
                count += 1;
                true
            })?;
            Ok(count)
        })
        .await
    }

    async fn apply_batch(&self, ops: &[BatchOp]) -> Result<(), StorageError> {
        for op in ops {
            check_key(op.key())?;
        }
        let ops = ops.to_vec();
        self.blocking(move |db| {
            // An uncommitted write transaction aborts on drop.
            let txn = db.begin_write().map_err(unavailable("write txn"))?;
            {
                let mut table = txn
                    .open_table(RECORDS)
                    .map_err(unavailable("open table"))?;
                for op in &ops {
                    match op {
                        BatchOp::Put { key, value } => {
                            table
                                .insert(key.as_slice(), value.as_slice())
                                .map_err(corrupted("insert"))?;
                        }
                        BatchOp::Delete { key } => {
                            table
                                .remove(key.as_slice())
                                .map_err(corrupted("remove"))?;
                        }
                    }
                }
            }
            txn.commit().map_err(corrupted("commit"))?;
            debug!(ops = ops.len(), "Committed batch");
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        // Commits are durable.
        Ok(())
    }

    fn name(&self) -> &str {
        "redb"
    }
}
