//! Keel Engine
//!
//! Applies plans computed by `keel-core` through an injected provider,
//! committing every result to the `keel-state` store.
//!
//! # Example
//!
//! ```ignore
//! use keel_engine::{Engine, EngineConfig};
//! use keel_state::BackendConfig;
//!
//! let backend = BackendConfig::new("local").with_attribute("path", ".keel");
//! let engine = Engine::from_config(provider, &backend, EngineConfig::default()).await?;
//!
//! let graph = engine.graph(&declarations).await?;
//! let plan = engine.plan(&graph).await?;
//! println!("{}", plan);
//!
//! let report = engine.apply(&graph, &plan).await?;
//! println!("{}", report);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod report;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult, NodeError};
pub use executor::{CancelHandle, Executor, RunLock};
pub use report::{ApplyReport, NodeOutcome};
