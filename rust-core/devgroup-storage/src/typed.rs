// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Namespaced JSON records over a raw backend.
//
// Groups, memberships, relation schemas and relation rows all live in one
// physical backend under their own `"{namespace}:"` key prefix. Writes can
// be staged as `BatchOp`s from several namespaces and committed together,
// which is how a rule change and its membership delta land as one unit.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{BatchOp, StorageBackend};
use crate::error::StorageError;

/// Zero-pad a numeric id so lexicographic key order matches numeric order.
pub fn padded_id(id: u64) -> String {
    format!("{id:020}")
}

/// JSON records in one key namespace of a [`StorageBackend`].
///
/// ```rust
/// use devgroup_storage::memory::InMemoryBackend;
/// use devgroup_storage::typed::TypedStore;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Serialize, Deserialize, PartialEq)]
/// struct Port { device_id: u64, if_index: u32 }
///
/// # tokio_test::block_on(async {
/// let ports = TypedStore::new(InMemoryBackend::new(), "ports");
///
/// let port = Port { device_id: 7, if_index: 3 };
/// ports.put("7:1", &port).await.unwrap();
/// assert_eq!(ports.get::<Port>("7:1").await.unwrap(), Some(port));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TypedStore<B: StorageBackend> {
    backend: B,
    /// `"{namespace}:"`, prepended to every logical key.
    prefix: String,
}

impl<B: StorageBackend> TypedStore<B> {
    pub fn new(backend: B, namespace: &str) -> Self {
        Self {
            backend,
            prefix: format!("{namespace}:"),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn namespace(&self) -> &str {
        self.prefix.trim_end_matches(':')
    }

    fn raw_key(&self, key: &str) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.prefix.len() + key.len());
        raw.extend_from_slice(self.prefix.as_bytes());
        raw.extend_from_slice(key.as_bytes());
        raw
    }

    /// Logical key of a raw backend key from this namespace.
    fn strip(&self, raw: &[u8]) -> Result<String, StorageError> {
        raw.strip_prefix(self.prefix.as_bytes())
            .and_then(|rest| std::str::from_utf8(rest).ok())
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::CorruptedData(format!(
                    "key {:?} is outside namespace '{}'",
                    String::from_utf8_lossy(raw),
                    self.namespace()
                ))
            })
    }

    fn encode<T: Serialize>(&self, key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(value).map_err(|err| StorageError::Encode {
            key: format!("{}{key}", self.prefix),
            reason: err.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Result<T, StorageError> {
        serde_json::from_slice(bytes).map_err(|err| StorageError::Decode {
            key: format!("{}{key}", self.prefix),
            reason: err.to_string(),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.backend
            .get(&self.raw_key(key))
            .await?
            .map(|bytes| self.decode(key, &bytes))
            .transpose()
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = self.encode(key, value)?;
        self.backend.put(&self.raw_key(key), &bytes).await
    }

    /// Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.delete(&self.raw_key(key)).await
    }

    /// Stage a put for a later [`apply`](Self::apply).
    pub fn put_op<T: Serialize>(&self, key: &str, value: &T) -> Result<BatchOp, StorageError> {
        Ok(BatchOp::Put {
            key: self.raw_key(key),
            value: self.encode(key, value)?,
        })
    }

    /// Stage a delete for a later [`apply`](Self::apply).
    pub fn delete_op(&self, key: &str) -> BatchOp {
        BatchOp::Delete {
            key: self.raw_key(key),
        }
    }

    /// Commit staged ops atomically. Ops may come from any store sharing
    /// this backend; an empty batch touches nothing.
    pub async fn apply(&self, ops: &[BatchOp]) -> Result<(), StorageError> {
        if ops.is_empty() {
            return Ok(());
        }
        self.backend.apply_batch(ops).await
    }

    /// Up to `limit` records whose logical key starts with `key_prefix`, in
    /// key order.
    pub async fn scan_prefix<T: DeserializeOwned>(
        &self,
        key_prefix: &str,
        limit: usize,
    ) -> Result<Vec<(String, T)>, StorageError> {
        let entries = self.backend.scan_prefix(&self.raw_key(key_prefix), limit).await?;
        entries
            .into_iter()
            .map(|(raw, bytes)| {
                let key = self.strip(&raw)?;
                let value = self.decode(&key, &bytes)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Logical keys under `key_prefix`, values ignored.
    pub async fn scan_keys(&self, key_prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self
            .backend
            .scan_prefix(&self.raw_key(key_prefix), usize::MAX)
            .await?;
        entries.iter().map(|(raw, _)| self.strip(raw)).collect()
    }

    pub async fn count_prefix(&self, key_prefix: &str) -> Result<usize, StorageError> {
        self.backend.count_prefix(&self.raw_key(key_prefix)).await
    }
}
