//! Keel State Management
//!
//! This crate stores the last committed state of every managed resource and
//! provides the advisory lock that serialises apply runs. Both are built on a
//! key-value backend with conditional writes (memory, local directory or S3).
//!
//! # Overview
//!
//! - **KvBackend**: storage trait with create-if-absent, compare-and-swap and
//!   conditional delete
//! - **StateStore**: one checksummed [`StateRecord`] per resource instance,
//!   committed with optimistic concurrency on its serial
//! - **LockManager**: run locks stored under `locks/<key>`
//!
//! # Example
//!
//! ```ignore
//! use keel_state::{create_backend, BackendConfig, LockManager, StateStore};
//!
//! let config = BackendConfig::new("s3")
//!     .with_attribute("bucket", "my-state-bucket")
//!     .with_attribute("prefix", "infra/prod")
//!     .with_attribute("region", "ap-northeast-1");
//!
//! let backend = create_backend(&config).await?;
//! let store = StateStore::new(backend.clone());
//! let locks = LockManager::new(backend);
//!
//! // Acquire lock before modifying state
//! let lock = locks.acquire("default", &lock_owner(), "apply", Duration::ZERO).await?;
//!
//! // Read current state
//! let snapshot = store.snapshot().await?;
//!
//! // ... commit records with the serial each was read at ...
//!
//! // Release lock
//! locks.release(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod error;
pub mod lock;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, KvBackend, Revision, Versioned};
pub use backends::{LocalBackend, MemoryBackend, S3Backend, create_backend};
pub use error::{StateError, StateResult};
pub use lock::{LockInfo, LockManager, lock_owner};
pub use state::{StateRecord, StateSnapshot};
pub use store::StateStore;
