// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types.
//
// Covers the failures a group store can hit below the engine: the backend
// going away, stored bytes that no longer decode, and keys past the size
// limit. A failed batch leaves the store as it was before the call.

use thiserror::Error;

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be turned into JSON for `key`.
    #[error("cannot encode value for '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// The bytes stored under `key` are not the expected type.
    #[error("cannot decode value at '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// A key or record does not have the layout its namespace requires.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// The backend cannot serve requests right now; retrying may succeed.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },
}

impl StorageError {
    /// Whether the same call could succeed if repeated later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::BackendUnavailable(_))
    }
}
