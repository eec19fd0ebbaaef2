//! Keel Core
//!
//! Core library for a declarative infrastructure reconciliation engine:
//! resource declarations are expanded into a dependency graph, diffed against
//! the last committed state and turned into a plan of per-resource actions.
//! Nothing in this crate performs side effects; applying a plan is the job of
//! `keel-engine` together with an injected [`provider::Provider`].

pub mod condition;
pub mod differ;
pub mod graph;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
