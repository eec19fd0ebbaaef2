//! State store and lock errors

use keel_core::resource::ResourceId;
use thiserror::Error;

use crate::backend::BackendError;
use crate::lock::LockInfo;

/// Errors returned by the state store and the lock manager
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    /// The stored serial differs from the one the caller expected
    #[error("Version conflict on {id}: expected serial {}, found {}", fmt_serial(.expected), fmt_serial(.found))]
    VersionConflict {
        id: ResourceId,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// The lock is held by someone else
    #[error("{key} is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    AlreadyLocked {
        key: String,
        lock_id: String,
        who: String,
        operation: String,
    },

    /// Lock ID mismatch when trying to release
    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    NotHolder { expected: String, actual: String },

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// A stored value could not be decoded or failed checksum verification
    #[error("Corrupt record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

fn fmt_serial(serial: &Option<u64>) -> String {
    match serial {
        Some(s) => s.to_string(),
        None => "none".to_string(),
    }
}

impl StateError {
    /// Create an AlreadyLocked error from a LockInfo
    pub fn locked(lock: &LockInfo) -> Self {
        Self::AlreadyLocked {
            key: lock.key.clone(),
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    pub fn corrupt(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptRecord {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;
