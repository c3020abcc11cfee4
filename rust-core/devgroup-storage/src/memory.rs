// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory group store.
//
// A sorted map behind a tokio `RwLock`. Key order gives prefix scans for
// free; a batch holds the write lock from first op to last, so no reader
// sees part of a membership delta.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{check_key, BatchOp, StorageBackend};
use crate::error::StorageError;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Entries under `prefix`, in key order.
fn under<'a>(map: &'a Map, prefix: &'a [u8]) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> {
    map.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |(k, _)| k.starts_with(prefix))
}

/// Process-local storage, lost on drop. Clones share one map, so a single
/// backend can sit under several typed stores.
///
/// ```rust
/// use devgroup_storage::memory::InMemoryBackend;
/// use devgroup_storage::backend::StorageBackend;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryBackend::new();
/// store.put(b"group_device:1:7", b"null").await.unwrap();
/// assert_eq!(store.count_prefix(b"group_device:1:").await.unwrap(), 1);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Map>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        check_key(key)?;
        self.data.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.data.read().await;
        Ok(under(&map, prefix)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StorageError> {
        let map = self.data.read().await;
        Ok(under(&map, prefix).count())
    }

    async fn apply_batch(&self, ops: &[BatchOp]) -> Result<(), StorageError> {
        for op in ops {
            check_key(op.key())?;
        }
        let mut map = self.data.write().await;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MAX_KEY_SIZE;

    fn put(key: &str, value: &str) -> BatchOp {
        BatchOp::Put {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    fn delete(key: &str) -> BatchOp {
        BatchOp::Delete {
            key: key.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_group_record_overwrite_and_delete() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty().await);

        backend.put(b"groups:1", b"{\"rule\":\"\"}").await.unwrap();
        backend.put(b"groups:1", b"{\"rule\":\"devices.os = 'ios'\"}").await.unwrap();
        assert_eq!(backend.len().await, 1);
        assert_eq!(
            backend.get(b"groups:1").await.unwrap().as_deref(),
            Some(&b"{\"rule\":\"devices.os = 'ios'\"}"[..])
        );

        assert!(backend.delete(b"groups:1").await.unwrap());
        assert!(!backend.delete(b"groups:1").await.unwrap());
        assert_eq!(backend.get(b"groups:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_stops_at_namespace_edge() {
        let backend = InMemoryBackend::new();
        backend
            .apply_batch(&[
                put("group_device:1:10", "null"),
                put("group_device:1:11", "null"),
                put("group_device:2:10", "null"),
                put("group_devices", "x"),
                put("groups:1", "{}"),
            ])
            .await
            .unwrap();

        let first: Vec<Vec<u8>> = backend
            .scan_prefix(b"group_device:1:", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(first, vec![b"group_device:1:10".to_vec(), b"group_device:1:11".to_vec()]);
        assert_eq!(backend.scan_prefix(b"group_device:", 2).await.unwrap().len(), 2);
        assert_eq!(backend.count_prefix(b"group_device:").await.unwrap(), 3);
        assert_eq!(backend.count_prefix(b"vlans:").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_applies_in_order() {
        let backend = InMemoryBackend::new();
        backend.put(b"group_device:1:3", b"null").await.unwrap();

        backend
            .apply_batch(&[
                delete("group_device:1:3"),
                put("group_device:1:4", "null"),
                put("groups:1", "old"),
                put("groups:1", "new"),
                delete("group_device:1:99"),
            ])
            .await
            .unwrap();

        assert_eq!(backend.get(b"group_device:1:3").await.unwrap(), None);
        assert_eq!(backend.get(b"groups:1").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn test_oversized_key_rejects_whole_batch() {
        let backend = InMemoryBackend::new();
        let long = "k".repeat(MAX_KEY_SIZE + 1);
        let result = backend
            .apply_batch(&[put("groups:1", "{}"), put(&long, "x")])
            .await;

        assert!(matches!(result, Err(StorageError::KeyTooLarge { .. })));
        assert!(backend.is_empty().await);
        assert!(backend.put(long.as_bytes(), b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let backend = InMemoryBackend::new();
        let clone = backend.clone();

        backend.put(b"meta:group_seq", b"3").await.unwrap();
        assert_eq!(clone.get(b"meta:group_seq").await.unwrap(), Some(b"3".to_vec()));
        assert_eq!(clone.name(), "in-memory");
        clone.flush().await.unwrap();
    }
}
