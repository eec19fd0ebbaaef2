//! Advisory run locks
//!
//! A lock is a value stored with create-if-absent under `locks/<key>`, so at
//! most one holder exists per key. Locks never expire; a lock left behind by
//! a crashed run is removed with [`LockManager::force_unlock`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, KvBackend};
use crate::error::{StateError, StateResult};

const LOCK_PREFIX: &str = "locks/";

/// Default interval between attempts on a contended lock
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Information about a held lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique identifier for this lock
    pub id: String,
    /// Lock key (e.g., "default", "prod")
    pub key: String,
    /// The operation being performed (e.g., "apply", "destroy")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    /// When the lock was created
    pub created: DateTime<Utc>,
}

impl LockInfo {
    /// Create a new lock for an operation
    pub fn new(
        key: impl Into<String>,
        operation: impl Into<String>,
        who: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            operation: operation.into(),
            who: who.into(),
            created: Utc::now(),
        }
    }
}

/// Get the lock owner string (username@hostname)
pub fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

fn lock_key(key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, key)
}

/// Acquires and releases run locks on a backend
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn KvBackend>,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Acquire `key` for `holder`.
    ///
    /// A held lock is retried every poll interval until `timeout` elapses; a
    /// zero timeout makes a single attempt.
    pub async fn acquire(
        &self,
        key: &str,
        holder: &str,
        operation: &str,
        timeout: Duration,
    ) -> StateResult<LockInfo> {
        let deadline = tokio::time::Instant::now() + timeout;
        let storage_key = lock_key(key);

        loop {
            let lock = LockInfo::new(key, operation, holder);
            let body = serde_json::to_vec_pretty(&lock).map_err(|e| {
                BackendError::Serialization(format!("Failed to serialize lock: {}", e))
            })?;

            match self.backend.put_if_absent(&storage_key, body).await {
                Ok(_) => {
                    info!("Acquired lock {} for {} ({})", key, holder, operation);
                    return Ok(lock);
                }
                Err(BackendError::ConditionFailed { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return match self.current(key).await? {
                    Some(existing) => Err(StateError::locked(&existing)),
                    // Released after our attempt; report the contention anyway
                    None => Err(StateError::AlreadyLocked {
                        key: key.to_string(),
                        lock_id: String::new(),
                        who: "unknown".to_string(),
                        operation: String::new(),
                    }),
                };
            }
            debug!("Lock {} is held, retrying", key);
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Release a lock previously returned by [`acquire`](Self::acquire).
    ///
    /// Fails with `NotHolder` if the stored lock belongs to someone else.
    pub async fn release(&self, lock: &LockInfo) -> StateResult<()> {
        self.remove(&lock.key, &lock.id).await?;
        info!("Released lock {}", lock.key);
        Ok(())
    }

    /// Remove a lock by id without holding it.
    ///
    /// Recovery path for locks left behind by a crashed run.
    pub async fn force_unlock(&self, key: &str, lock_id: &str) -> StateResult<()> {
        self.remove(key, lock_id).await?;
        warn!("Force-unlocked {} (lock ID: {})", key, lock_id);
        Ok(())
    }

    /// The lock currently stored for `key`
    pub async fn current(&self, key: &str) -> StateResult<Option<LockInfo>> {
        let storage_key = lock_key(key);
        match self.backend.get(&storage_key).await? {
            Some(stored) => serde_json::from_slice(&stored.value)
                .map(Some)
                .map_err(|e| StateError::corrupt(storage_key, e)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str, lock_id: &str) -> StateResult<()> {
        let storage_key = lock_key(key);
        let Some(stored) = self.backend.get(&storage_key).await? else {
            return Err(StateError::LockNotFound(lock_id.to_string()));
        };
        let existing: LockInfo = serde_json::from_slice(&stored.value)
            .map_err(|e| StateError::corrupt(storage_key.as_str(), e))?;

        if existing.id != lock_id {
            return Err(StateError::NotHolder {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }

        match self.backend.delete_if(&storage_key, &stored.revision).await {
            Ok(()) => Ok(()),
            // Replaced between read and delete, so it is no longer ours
            Err(BackendError::ConditionFailed { .. }) => {
                Err(StateError::LockNotFound(lock_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
