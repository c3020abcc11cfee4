// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The storage contract.
//
// Ordered byte keys, prefix scans and counts, and atomic mixed batches.
// Membership reconciliation depends on batches being all-or-nothing.

use async_trait::async_trait;

use crate::error::StorageError;

/// Longest key any backend accepts.
pub const MAX_KEY_SIZE: usize = 1024;

/// Reject keys longer than [`MAX_KEY_SIZE`].
pub fn check_key(key: &[u8]) -> Result<(), StorageError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(StorageError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key` with `value`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key` if present.
    Delete { key: Vec<u8> },
}

impl BatchOp {
    /// The key this operation touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Byte-oriented ordered key-value store behind the group engine.
///
/// Keys sort lexicographically; the engine relies on that for prefix scans
/// over zero-padded ids. Typed access lives in [`crate::typed::TypedStore`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// `Ok(None)` for a missing key.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Returns whether the key was present.
    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// At most `limit` entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Number of keys starting with `prefix`.
    async fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StorageError>;

    /// Apply `ops` in order as one atomic write: all become visible or none
    /// do. A later op on the same key wins.
    async fn apply_batch(&self, ops: &[BatchOp]) -> Result<(), StorageError>;

    /// Make earlier writes durable. No-op where writes already are.
    async fn flush(&self) -> Result<(), StorageError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_op_key() {
        let put = BatchOp::Put {
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        };
        let del = BatchOp::Delete { key: b"b".to_vec() };
        assert_eq!(put.key(), b"a");
        assert_eq!(del.key(), b"b");
    }

    #[test]
    fn test_check_key_limit() {
        assert!(check_key(&[b'k'; MAX_KEY_SIZE]).is_ok());
        let err = check_key(&[b'k'; MAX_KEY_SIZE + 1]).unwrap_err();
        assert!(matches!(err, StorageError::KeyTooLarge { size, .. } if size == MAX_KEY_SIZE + 1));
    }
}
