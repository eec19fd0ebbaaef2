//! Engine - Plan and apply against one provider and one state backend

use std::sync::Arc;

use keel_core::differ::{create_destroy_plan, create_plan};
use keel_core::graph::{GraphBuilder, ResourceGraph};
use keel_core::plan::Plan;
use keel_core::provider::Provider;
use keel_core::resource::ResourceDecl;
use keel_state::{
    BackendConfig, KvBackend, LockManager, StateError, StateSnapshot, StateStore, create_backend,
};
use log::info;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::executor::{CancelHandle, Executor, RunLock};
use crate::report::ApplyReport;

/// Entry point tying graph building, planning and applying together
pub struct Engine {
    provider: Arc<dyn Provider>,
    store: StateStore,
    locks: LockManager,
    config: EngineConfig,
    cancel: CancelHandle,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn Provider>,
        backend: Arc<dyn KvBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store: StateStore::new(backend.clone()),
            locks: LockManager::new(backend),
            config,
            cancel: CancelHandle::new(),
        }
    }

    /// Create an engine on the backend described by `backend`
    pub async fn from_config(
        provider: Arc<dyn Provider>,
        backend: &BackendConfig,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let backend = create_backend(backend).await.map_err(StateError::from)?;
        Ok(Self::new(provider, backend, config))
    }

    /// Replace the lock manager (e.g. to shorten the poll interval)
    pub fn with_lock_manager(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle that stops the running apply, or the next one when idle
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// All committed records
    pub async fn current_state(&self) -> EngineResult<StateSnapshot> {
        Ok(self.store.snapshot().await?)
    }

    /// Build the resource graph, resolving `count` / `for_each` against
    /// committed state
    pub async fn graph(&self, decls: &[ResourceDecl]) -> EngineResult<ResourceGraph> {
        let snapshot = self.current_state().await?;
        let graph = GraphBuilder::new().with_known(&snapshot).build(decls)?;
        Ok(graph)
    }

    /// Diff the graph against committed state
    pub async fn plan(&self, graph: &ResourceGraph) -> EngineResult<Plan> {
        let priors = self.current_state().await?.priors();
        let plan = create_plan(graph, &priors, |t| self.provider.schema(t))?;
        info!("{}", plan.summary());
        Ok(plan)
    }

    /// Plan destroying every resource in state
    pub async fn plan_destroy(&self, graph: &ResourceGraph) -> EngineResult<Plan> {
        let priors = self.current_state().await?.priors();
        let plan = create_destroy_plan(graph, &priors)?;
        info!("{}", plan.summary());
        Ok(plan)
    }

    /// Apply a plan computed for `graph` while holding the run lock
    pub async fn apply(&self, graph: &ResourceGraph, plan: &Plan) -> EngineResult<ApplyReport> {
        let lock = RunLock {
            key: self.config.lock_key.clone(),
            holder: self.config.holder(),
            timeout: self.config.lock_timeout(),
        };
        let executor = Executor::new(self.provider.clone(), self.store.clone())
            .with_parallelism(self.config.parallelism())
            .with_provider_timeout(self.config.provider_timeout())
            .with_cancel_handle(self.cancel.clone())
            .with_lock(self.locks.clone(), lock);
        executor.run(graph, plan).await
    }
}
