//! In-memory backend
//!
//! Shared by every clone of the same `Arc`, so it serialises concurrent
//! callers within one process only.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{BackendError, BackendResult, KvBackend, Revision, Versioned};

#[derive(Default)]
struct Inner {
    entries: HashMap<String, (Vec<u8>, u64)>,
    generation: u64,
}

impl Inner {
    fn next_revision(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Backend holding all values in memory
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn revision(generation: u64) -> Revision {
    Revision::new(generation.to_string())
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Versioned>> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(key).map(|(value, generation)| Versioned {
            value: value.clone(),
            revision: revision(*generation),
        }))
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> BackendResult<Revision> {
        let mut inner = self.inner.lock().await;
        if inner.entries.contains_key(key) {
            return Err(BackendError::condition_failed(key));
        }
        let generation = inner.next_revision();
        inner.entries.insert(key.to_string(), (value, generation));
        Ok(revision(generation))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Revision,
        value: Vec<u8>,
    ) -> BackendResult<Revision> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some((_, current)) if revision(*current) == *expected => {}
            _ => return Err(BackendError::condition_failed(key)),
        }
        let generation = inner.next_revision();
        inner.entries.insert(key.to_string(), (value, generation));
        Ok(revision(generation))
    }

    async fn delete_if(&self, key: &str, expected: &Revision) -> BackendResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some((_, current)) if revision(*current) == *expected => {
                inner.entries.remove(key);
                Ok(())
            }
            _ => Err(BackendError::condition_failed(key)),
        }
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
