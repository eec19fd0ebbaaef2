//! Key-value backend trait and error types
//!
//! Every backend offers conditional writes keyed on an opaque revision. The
//! state store and the lock manager are built entirely on these primitives,
//! so correctness under concurrency reduces to the backend honouring them.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when interacting with a backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// A conditional write or delete found a different revision (or an
    /// existing value for a create)
    #[error("Condition failed for key: {key}")]
    ConditionFailed { key: String },

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// The bucket/container does not exist
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Failed to create bucket
    #[error("Failed to create bucket: {0}")]
    BucketCreationFailed(String),

    /// Key cannot be stored by this backend
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Network or I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn condition_failed(key: impl Into<String>) -> Self {
        Self::ConditionFailed { key: key.into() }
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend-assigned version of a stored value.
///
/// Only meaningful to the backend that issued it: a counter, a content hash
/// or an object ETag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(String);

impl Revision {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored value together with its revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub revision: Revision,
}

/// Trait for key-value backends with conditional writes
///
/// Keys are `/`-separated strings. Implementations must make each
/// conditional operation atomic with respect to every other caller sharing
/// the same storage.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a value; `None` if the key does not exist
    async fn get(&self, key: &str) -> BackendResult<Option<Versioned>>;

    /// Store a value only if the key does not exist yet.
    ///
    /// Fails with [`BackendError::ConditionFailed`] when it does.
    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> BackendResult<Revision>;

    /// Replace a value only if its current revision is `expected`
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Revision,
        value: Vec<u8>,
    ) -> BackendResult<Revision>;

    /// Delete a value only if its current revision is `expected`
    async fn delete_if(&self, key: &str, expected: &Revision) -> BackendResult<()>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;
}

/// Configuration for a backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    /// Backend type (e.g., "memory", "local", "s3")
    pub backend_type: String,
    /// Backend-specific attributes
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean attribute value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(|v| v.as_bool())
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Get an unsigned integer attribute value
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(|v| v.as_u64())
    }
}
