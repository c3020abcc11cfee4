// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation counting wrapper for storage backends.
//
// Delegates to any `StorageBackend` and counts what reaches it. Reconciliation
// promises that an unchanged membership costs no writes; `writes()` is how
// that promise is checked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::backend::{BatchOp, StorageBackend};
use crate::error::StorageError;

/// Snapshot of the counters kept by a [`MetricsBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub gets: u64,
    /// `scan_prefix` and `count_prefix` calls.
    pub scans: u64,
    /// Single-key puts and deletes.
    pub key_writes: u64,
    pub batches: u64,
    /// Operations carried by successful batches.
    pub batch_ops: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Wall-clock time spent in writes, in microseconds.
    pub write_micros: u64,
}

impl BackendStats {
    /// Every key mutation observed, single or batched.
    pub fn writes(&self) -> u64 {
        self.key_writes + self.batch_ops
    }
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    scans: AtomicU64,
    key_writes: AtomicU64,
    batches: AtomicU64,
    batch_ops: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    write_micros: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BackendStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BackendStats {
            gets: load(&self.gets),
            scans: load(&self.scans),
            key_writes: load(&self.key_writes),
            batches: load(&self.batches),
            batch_ops: load(&self.batch_ops),
            bytes_read: load(&self.bytes_read),
            bytes_written: load(&self.bytes_written),
            write_micros: load(&self.write_micros),
        }
    }

    fn reset(&self) {
        for c in [
            &self.gets,
            &self.scans,
            &self.key_writes,
            &self.batches,
            &self.batch_ops,
            &self.bytes_read,
            &self.bytes_written,
            &self.write_micros,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    fn timed_write(&self, start: Instant) {
        let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        Self::bump(&self.write_micros, micros);
    }
}

/// A backend wrapper that counts operations. Clones share the counters.
///
/// ```rust
/// use devgroup_storage::memory::InMemoryBackend;
/// use devgroup_storage::metrics::MetricsBackend;
/// use devgroup_storage::backend::StorageBackend;
///
/// # tokio_test::block_on(async {
/// let metered = MetricsBackend::new(InMemoryBackend::new());
/// metered.put(b"groups:1", b"{}").await.unwrap();
/// metered.get(b"groups:1").await.unwrap();
///
/// let stats = metered.stats();
/// assert_eq!((stats.gets, stats.writes()), (1, 1));
/// # });
/// ```
pub struct MetricsBackend<B: StorageBackend> {
    inner: B,
    counters: Arc<Counters>,
}

impl<B: StorageBackend + Clone> Clone for MetricsBackend<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<B: StorageBackend> MetricsBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> BackendStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for MetricsBackend<B> {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let result = self.inner.get(key).await;
        Counters::bump(&self.counters.gets, 1);
        if let Ok(Some(value)) = &result {
            Counters::bump(&self.counters.bytes_read, value.len() as u64);
        }
        result
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.inner.put(key, value).await;
        self.counters.timed_write(start);
        Counters::bump(&self.counters.key_writes, 1);
        if result.is_ok() {
            Counters::bump(&self.counters.bytes_written, value.len() as u64);
        }
        result
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        let start = Instant::now();
        let result = self.inner.delete(key).await;
        self.counters.timed_write(start);
        Counters::bump(&self.counters.key_writes, 1);
        result
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let result = self.inner.scan_prefix(prefix, limit).await;
        Counters::bump(&self.counters.scans, 1);
        if let Ok(entries) = &result {
            let bytes: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            Counters::bump(&self.counters.bytes_read, bytes as u64);
        }
        result
    }

    async fn count_prefix(&self, prefix: &[u8]) -> Result<usize, StorageError> {
        Counters::bump(&self.counters.scans, 1);
        self.inner.count_prefix(prefix).await
    }

    async fn apply_batch(&self, ops: &[BatchOp]) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.inner.apply_batch(ops).await;
        self.counters.timed_write(start);
        Counters::bump(&self.counters.batches, 1);
        if result.is_ok() {
            Counters::bump(&self.counters.batch_ops, ops.len() as u64);
            let bytes: usize = ops
                .iter()
                .map(|op| match op {
                    BatchOp::Put { value, .. } => value.len(),
                    BatchOp::Delete { .. } => 0,
                })
                .sum();
            Counters::bump(&self.counters.bytes_written, bytes as u64);
        }
        result
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.inner.flush().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MAX_KEY_SIZE;
    use crate::memory::InMemoryBackend;

    #[tokio::test]
    async fn test_reads_are_not_writes() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        metered.put(b"groups:1", b"{}").await.unwrap();
        metered.reset_stats();

        metered.get(b"groups:1").await.unwrap();
        metered.get(b"groups:2").await.unwrap();
        metered.scan_prefix(b"groups:", 10).await.unwrap();
        metered.count_prefix(b"groups:").await.unwrap();

        let stats = metered.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.scans, 2);
        assert_eq!(stats.writes(), 0);
        // 2 bytes from get, 10 + 2 from the scan.
        assert_eq!(stats.bytes_read, 14);
    }

    #[tokio::test]
    async fn test_batch_counts_each_op() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        metered
            .apply_batch(&[
                BatchOp::Put {
                    key: b"group_device:1:7".to_vec(),
                    value: b"null".to_vec(),
                },
                BatchOp::Put {
                    key: b"groups:1".to_vec(),
                    value: b"{}".to_vec(),
                },
                BatchOp::Delete {
                    key: b"group_device:1:3".to_vec(),
                },
            ])
            .await
            .unwrap();
        metered.delete(b"groups:1").await.unwrap();

        let stats = metered.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.batch_ops, 3);
        assert_eq!(stats.bytes_written, 6);
        assert_eq!(stats.writes(), 4);
    }

    #[tokio::test]
    async fn test_rejected_batch_adds_no_ops() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        let result = metered
            .apply_batch(&[BatchOp::Delete {
                key: vec![b'k'; MAX_KEY_SIZE + 1],
            }])
            .await;

        assert!(result.is_err());
        let stats = metered.stats();
        assert_eq!((stats.batches, stats.batch_ops), (1, 0));
    }

    #[tokio::test]
    async fn test_clones_share_counters() {
        let metered = MetricsBackend::new(InMemoryBackend::new());
        let clone = metered.clone();

        clone.put(b"k", b"v").await.unwrap();
        assert_eq!(metered.stats().key_writes, 1);
        assert_eq!(metered.name(), "in-memory");
        assert_eq!(metered.inner().len().await, 1);

        metered.reset_stats();
        assert_eq!(clone.stats(), BackendStats::default());
    }
}
