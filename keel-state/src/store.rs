//! State store: one record per resource instance with optimistic concurrency
//!
//! Records live under `state/<identity>`. Each commit names the serial the
//! caller last saw; the write goes through only if the stored record still
//! carries that serial, so concurrent writers cannot lose each other's
//! updates. No in-process mutex is involved.

use std::sync::Arc;

use keel_core::resource::ResourceId;
use log::debug;

use crate::backend::{BackendError, KvBackend, Versioned};
use crate::error::{StateError, StateResult};
use crate::state::{StateRecord, StateSnapshot};

const STATE_PREFIX: &str = "state/";

/// Backend key of a resource's record
pub fn state_key(id: &ResourceId) -> String {
    format!("{}{}", STATE_PREFIX, id)
}

/// Durable mapping from resource identity to its last committed record
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn KvBackend>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    fn decode(key: &str, stored: &Versioned) -> StateResult<StateRecord> {
        let record: StateRecord =
            serde_json::from_slice(&stored.value).map_err(|e| StateError::corrupt(key, e))?;
        if !record.verify() {
            return Err(StateError::corrupt(key, "checksum mismatch"));
        }
        Ok(record)
    }

    async fn read(&self, id: &ResourceId) -> StateResult<Option<(StateRecord, Versioned)>> {
        let key = state_key(id);
        match self.backend.get(&key).await? {
            Some(stored) => {
                let record = Self::decode(&key, &stored)?;
                Ok(Some((record, stored)))
            }
            None => Ok(None),
        }
    }

    fn conflict(id: &ResourceId, expected: Option<u64>, found: Option<u64>) -> StateError {
        StateError::VersionConflict {
            id: id.clone(),
            expected,
            found,
        }
    }

    /// Read the last committed record
    pub async fn get(&self, id: &ResourceId) -> StateResult<Option<StateRecord>> {
        Ok(self.read(id).await?.map(|(record, _)| record))
    }

    /// Commit a record if the stored serial is still `expected_serial`.
    ///
    /// `None` means the caller expects no record to exist. On success the
    /// committed record (serial `expected + 1`, or 1) is returned.
    pub async fn commit(
        &self,
        mut record: StateRecord,
        expected_serial: Option<u64>,
    ) -> StateResult<StateRecord> {
        let id = record.id.clone();
        let key = state_key(&id);
        let serial = expected_serial.map_or(1, |s| s + 1);
        record.seal(serial);
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize record: {}", e))
        })?;

        let written = match expected_serial {
            None => self.backend.put_if_absent(&key, bytes).await,
            Some(expected) => {
                let current = self.read(&id).await?;
                let revision = match current {
                    Some((stored, versioned)) if stored.serial == expected => versioned.revision,
                    other => {
                        return Err(Self::conflict(
                            &id,
                            expected_serial,
                            other.map(|(r, _)| r.serial),
                        ));
                    }
                };
                self.backend.compare_and_swap(&key, &revision, bytes).await
            }
        };

        match written {
            Ok(_) => {
                debug!("Committed {} at serial {}", id, serial);
                Ok(record)
            }
            Err(BackendError::ConditionFailed { .. }) => {
                let found = self.read(&id).await.ok().flatten().map(|(r, _)| r.serial);
                Err(Self::conflict(&id, expected_serial, found))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a record if the stored serial is still `expected_serial`
    pub async fn delete(&self, id: &ResourceId, expected_serial: u64) -> StateResult<()> {
        let key = state_key(id);
        let revision = match self.read(id).await? {
            Some((stored, versioned)) if stored.serial == expected_serial => versioned.revision,
            other => {
                return Err(Self::conflict(
                    id,
                    Some(expected_serial),
                    other.map(|(r, _)| r.serial),
                ));
            }
        };

        match self.backend.delete_if(&key, &revision).await {
            Ok(()) => {
                debug!("Deleted record {}", id);
                Ok(())
            }
            Err(BackendError::ConditionFailed { .. }) => {
                let found = self.read(id).await.ok().flatten().map(|(r, _)| r.serial);
                Err(Self::conflict(id, Some(expected_serial), found))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read every committed record.
    ///
    /// Records are read one by one; the result is not atomic across keys.
    pub async fn snapshot(&self) -> StateResult<StateSnapshot> {
        let keys = self.backend.list(STATE_PREFIX).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            // Deleted between list and get
            let Some(stored) = self.backend.get(&key).await? else {
                continue;
            };
            records.push(Self::decode(&key, &stored)?);
        }
        Ok(StateSnapshot::new(records))
    }
}
