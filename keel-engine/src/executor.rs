//! Executor - Apply a plan with bounded parallelism
//!
//! Plan entries become ready once every entry they wait on has succeeded.
//! Creates, updates and replacements wait on their graph dependencies;
//! destroys wait on every entry whose recorded state depends on them, so
//! dependents are removed first. A failure marks everything downstream
//! `UpstreamFailed` without calling the provider, while independent branches
//! keep running.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use keel_core::condition::{Condition, Verdict, evaluate_all};
use keel_core::graph::{ResourceGraph, ResourceNode};
use keel_core::plan::{Plan, PlanAction, PlannedChange, PriorState, ReplaceOrder};
use keel_core::provider::{ApplyRequest, Provider};
use keel_core::resource::{Attributes, Reference, ResourceId, ValueSource};
use keel_state::{LockManager, StateError, StateRecord, StateSnapshot, StateStore};
use log::{debug, info, warn};
use tokio::task::JoinSet;

use crate::error::{EngineError, EngineResult, NodeError};
use crate::report::{ApplyReport, NodeOutcome};

/// Stops an apply from starting further nodes.
///
/// A cancellation applies to the run in progress, or to the next run when
/// none is active; the flag clears when that run ends.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes already running finish; nodes not started are skipped
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run lock taken around an apply
#[derive(Debug, Clone)]
pub struct RunLock {
    pub key: String,
    pub holder: String,
    pub timeout: Duration,
}

/// Applies plans against one provider and one state store
pub struct Executor {
    provider: Arc<dyn Provider>,
    store: StateStore,
    parallelism: usize,
    provider_timeout: Option<Duration>,
    cancel: CancelHandle,
    lock: Option<(LockManager, RunLock)>,
}

impl Executor {
    pub const DEFAULT_PARALLELISM: usize = 10;
    pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(1800);

    pub fn new(provider: Arc<dyn Provider>, store: StateStore) -> Self {
        Self {
            provider,
            store,
            parallelism: Self::DEFAULT_PARALLELISM,
            provider_timeout: Some(Self::DEFAULT_PROVIDER_TIMEOUT),
            cancel: CancelHandle::new(),
            lock: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Bound every provider call; `None` leaves calls unbounded
    pub fn with_provider_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.provider_timeout = timeout.into();
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Hold `lock` for the whole run
    pub fn with_lock(mut self, locks: LockManager, lock: RunLock) -> Self {
        self.lock = Some((locks, lock));
        self
    }

    /// Apply `plan`, taking the run lock first if one is configured.
    ///
    /// Node failures are reported in the returned [`ApplyReport`]; an error
    /// means nothing was applied.
    pub async fn run(&self, graph: &ResourceGraph, plan: &Plan) -> EngineResult<ApplyReport> {
        check_plan(graph, plan)?;

        let held = match &self.lock {
            Some((locks, lock)) => {
                let operation = if plan
                    .changes()
                    .iter()
                    .all(|c| matches!(c.action, PlanAction::Destroy))
                {
                    "destroy"
                } else {
                    "apply"
                };
                let info = locks
                    .acquire(&lock.key, &lock.holder, operation, lock.timeout)
                    .await?;
                Some((locks, info))
            }
            None => None,
        };

        let report = self.execute(graph, plan).await;

        if let Some((locks, info)) = held
            && let Err(e) = locks.release(&info).await
        {
            warn!("Failed to release lock {}: {}", info.key, e);
        }
        Ok(report)
    }

    /// Apply `plan` without locking
    pub async fn execute(&self, graph: &ResourceGraph, plan: &Plan) -> ApplyReport {
        let changes = plan.changes();
        info!(
            "Applying {} changes with parallelism {}",
            plan.mutation_count(),
            self.parallelism
        );

        let mut schedule = Schedule::new(changes);
        let mut running: JoinSet<NodeOutcome> = JoinSet::new();
        let mut tasks: HashMap<tokio::task::Id, usize> = HashMap::new();

        loop {
            while running.len() < self.parallelism && !self.cancel.is_cancelled() {
                let Some(i) = schedule.ready.pop_front() else {
                    break;
                };
                let change = &changes[i];
                debug!("Starting {:?} of {}", change.action.kind(), change.id);
                let task = NodeTask {
                    provider: self.provider.clone(),
                    store: self.store.clone(),
                    timeout: self.provider_timeout,
                    change: change.clone(),
                    node: graph.node(&change.id).cloned(),
                };
                let handle = running.spawn(task.run());
                tasks.insert(handle.id(), i);
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(err) => (
                    err.id(),
                    NodeOutcome::Failed(NodeError::Provider(format!("task failed: {}", err))),
                ),
            };
            let Some(i) = tasks.remove(&task_id) else {
                continue;
            };
            match &outcome {
                NodeOutcome::Failed(err) => warn!("{}: {}", changes[i].id, err),
                other => debug!("{}: {}", changes[i].id, other),
            }
            schedule.finish(i, outcome, changes);
        }

        let reason = if self.cancel.is_cancelled() {
            self.cancel.reset();
            "cancelled"
        } else {
            "not started"
        };
        let report = ApplyReport::new(
            changes
                .iter()
                .zip(schedule.outcomes)
                .map(|(change, outcome)| {
                    (
                        change.id.clone(),
                        outcome.unwrap_or_else(|| NodeOutcome::Skipped(reason.to_string())),
                    )
                })
                .collect(),
        );
        info!(
            "Apply finished: {} applied, {} failed, {} skipped",
            report.applied_count(),
            report.failed_count(),
            report.skipped_count()
        );
        report
    }
}

/// Reject plans that were not computed for `graph`
fn check_plan(graph: &ResourceGraph, plan: &Plan) -> EngineResult<()> {
    for change in plan.changes() {
        let destroy = matches!(change.action, PlanAction::Destroy);
        if !destroy && !graph.contains(&change.id) {
            return Err(EngineError::PlanMismatch(format!(
                "{} is not in the graph",
                change.id
            )));
        }
        let needs_prior = matches!(
            change.action,
            PlanAction::Update(_) | PlanAction::Replace { .. } | PlanAction::Destroy
        );
        if needs_prior && change.prior.is_none() {
            return Err(EngineError::PlanMismatch(format!(
                "{} has no prior state",
                change.id
            )));
        }
    }
    Ok(())
}

/// Readiness bookkeeping over plan indexes
struct Schedule {
    outcomes: Vec<Option<NodeOutcome>>,
    /// Entry -> entries waiting on it
    blocks: Vec<Vec<usize>>,
    remaining: Vec<usize>,
    ready: VecDeque<usize>,
}

impl Schedule {
    fn new(changes: &[PlannedChange]) -> Self {
        let n = changes.len();
        let index: HashMap<&ResourceId, usize> =
            changes.iter().enumerate().map(|(i, c)| (&c.id, i)).collect();
        let mut schedule = Self {
            outcomes: vec![None; n],
            blocks: vec![Vec::new(); n],
            remaining: vec![0; n],
            ready: VecDeque::new(),
        };

        for (i, change) in changes.iter().enumerate() {
            if !change.action.is_change() {
                schedule.outcomes[i] = Some(NodeOutcome::NoOp);
                continue;
            }
            for j in waits_on(i, changes, &index) {
                schedule.blocks[j].push(i);
                schedule.remaining[i] += 1;
            }
        }
        for i in 0..n {
            if schedule.outcomes[i].is_none() && schedule.remaining[i] == 0 {
                schedule.ready.push_back(i);
            }
        }
        schedule
    }

    fn finish(&mut self, i: usize, outcome: NodeOutcome, changes: &[PlannedChange]) {
        let success = outcome.is_success();
        let root = match &outcome {
            NodeOutcome::Failed(NodeError::UpstreamFailed(root)) => root.clone(),
            _ => changes[i].id.clone(),
        };
        self.outcomes[i] = Some(outcome);

        if success {
            for &waiter in &self.blocks[i] {
                self.remaining[waiter] -= 1;
                if self.remaining[waiter] == 0 && self.outcomes[waiter].is_none() {
                    self.ready.push_back(waiter);
                }
            }
            return;
        }

        let mut stack = vec![i];
        while let Some(j) = stack.pop() {
            for &waiter in &self.blocks[j] {
                if self.outcomes[waiter].is_none() {
                    debug!("{}: upstream {} failed", changes[waiter].id, root);
                    self.outcomes[waiter] =
                        Some(NodeOutcome::Failed(NodeError::UpstreamFailed(root.clone())));
                    stack.push(waiter);
                }
            }
        }
    }
}

/// Indexes of the changing entries that entry `i` must wait for
fn waits_on(
    i: usize,
    changes: &[PlannedChange],
    index: &HashMap<&ResourceId, usize>,
) -> Vec<usize> {
    let change = &changes[i];
    if matches!(change.action, PlanAction::Destroy) {
        // Everything that depended on this resource goes first
        changes
            .iter()
            .enumerate()
            .filter(|(j, other)| {
                *j != i
                    && other.action.is_change()
                    && other
                        .prior
                        .as_ref()
                        .is_some_and(|p| p.dependencies.contains(&change.id))
            })
            .map(|(j, _)| j)
            .collect()
    } else {
        change
            .dependencies
            .iter()
            .filter_map(|dep| index.get(dep).copied())
            .filter(|&j| j != i && changes[j].action.is_change())
            .collect()
    }
}

/// Values visible to a node while it is applied
struct NodeValues<'a> {
    dependencies: &'a StateSnapshot,
    own: Option<&'a Attributes>,
}

impl ValueSource for NodeValues<'_> {
    fn lookup(&self, reference: &Reference) -> Option<serde_json::Value> {
        self.dependencies.lookup(reference)
    }

    fn self_attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.own.and_then(|attrs| attrs.get(name).cloned())
    }
}

/// One plan entry, owned by its worker task
struct NodeTask {
    provider: Arc<dyn Provider>,
    store: StateStore,
    timeout: Option<Duration>,
    change: PlannedChange,
    node: Option<ResourceNode>,
}

impl NodeTask {
    async fn run(self) -> NodeOutcome {
        let Some(kind) = self.change.action.kind() else {
            return NodeOutcome::NoOp;
        };
        match self.apply().await {
            Ok(()) => NodeOutcome::Applied(kind),
            Err(e) => NodeOutcome::Failed(e),
        }
    }

    async fn apply(&self) -> Result<(), NodeError> {
        match &self.change.action {
            PlanAction::NoOp => Ok(()),
            PlanAction::Create => {
                let node = self.node()?;
                let deps = self.dependency_values(node).await?;
                let desired = self.desired(node, &deps, None)?;
                let record = self.create(node, desired, None).await?;
                self.postconditions(node, &deps, &record)
            }
            PlanAction::Update(_) => {
                let node = self.node()?;
                let prior = self.prior()?;
                self.check_current(prior).await?;
                let deps = self.dependency_values(node).await?;
                let desired = self.desired(node, &deps, Some(&prior.attributes))?;
                let attributes = self
                    .call(ApplyRequest::update(
                        self.change.id.clone(),
                        prior.attributes.clone(),
                        desired,
                    ))
                    .await?;
                let record = self.commit(node, attributes, Some(prior.serial)).await?;
                self.postconditions(node, &deps, &record)
            }
            PlanAction::Replace { order, .. } => {
                let node = self.node()?;
                let prior = self.prior()?;
                self.check_destroy_allowed(prior)?;
                self.check_current(prior).await?;
                let deps = self.dependency_values(node).await?;
                let desired = self.desired(node, &deps, None)?;

                let record = match order {
                    ReplaceOrder::DestroyBeforeCreate => {
                        self.destroy(prior).await?;
                        self.create(node, desired, None).await?
                    }
                    ReplaceOrder::CreateBeforeDestroy => {
                        let record = self.create(node, desired, Some(prior.serial)).await?;
                        // The record already points at the new object
                        self.call(ApplyRequest::delete(
                            self.change.id.clone(),
                            prior.attributes.clone(),
                        ))
                        .await
                        .map_err(|e| {
                            NodeError::Provider(format!(
                                "replacement created but old object not destroyed: {}",
                                e
                            ))
                        })?;
                        record
                    }
                };
                self.postconditions(node, &deps, &record)
            }
            PlanAction::Destroy => {
                let prior = self.prior()?;
                self.check_destroy_allowed(prior)?;
                self.check_current(prior).await?;
                self.destroy(prior).await
            }
        }
    }

    fn node(&self) -> Result<&ResourceNode, NodeError> {
        self.node
            .as_ref()
            .ok_or_else(|| NodeError::Store(format!("{} is not in the graph", self.change.id)))
    }

    fn prior(&self) -> Result<&PriorState, NodeError> {
        self.change
            .prior
            .as_ref()
            .ok_or_else(|| NodeError::Store(format!("{} has no prior state", self.change.id)))
    }

    fn check_destroy_allowed(&self, prior: &PriorState) -> Result<(), NodeError> {
        let declared = self
            .node
            .as_ref()
            .is_some_and(|n| n.lifecycle.prevent_destroy);
        if declared || prior.protected {
            return Err(NodeError::DestroyForbidden);
        }
        Ok(())
    }

    /// Freshly committed records of the node's dependencies
    async fn dependency_values(&self, node: &ResourceNode) -> Result<StateSnapshot, NodeError> {
        let mut records = Vec::with_capacity(node.dependencies.len());
        for dep in &node.dependencies {
            if let Some(record) = self.store.get(dep).await? {
                records.push(record);
            }
        }
        Ok(StateSnapshot::new(records))
    }

    /// Resolve desired attributes after checking preconditions.
    ///
    /// On update, ignored attributes keep their committed value.
    fn desired(
        &self,
        node: &ResourceNode,
        deps: &StateSnapshot,
        prior: Option<&Attributes>,
    ) -> Result<Attributes, NodeError> {
        let values = NodeValues {
            dependencies: deps,
            own: None,
        };
        check_conditions(&node.preconditions, &values, NodeError::PreconditionFailed)?;

        let ignore = &node.lifecycle.ignore_changes;
        let mut desired = Attributes::new();
        for (name, value) in &node.attributes {
            let kept = prior
                .filter(|_| ignore.ignores(name))
                .and_then(|p| p.get(name).cloned());
            let resolved = match kept {
                Some(value) => value,
                None => value
                    .resolve(&values)
                    .ok_or_else(|| NodeError::UnknownValue(format!("{}.{}", node.id, name)))?,
            };
            desired.insert(name.clone(), resolved);
        }
        Ok(desired)
    }

    /// Provider call bounded by the timeout
    async fn call(&self, request: ApplyRequest) -> Result<Attributes, NodeError> {
        debug!("{} {}", request.kind, request.id);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.provider.apply(request))
                .await
                .map_err(|_| NodeError::Provider("timed out".to_string()))?,
            None => self.provider.apply(request).await,
        };
        result.map_err(|e| NodeError::Provider(e.to_string()))
    }

    /// Refuse a stale plan before the provider is called
    async fn check_current(&self, prior: &PriorState) -> Result<(), NodeError> {
        let found = self.store.get(&self.change.id).await?.map(|r| r.serial);
        if found != Some(prior.serial) {
            return Err(StateError::VersionConflict {
                id: self.change.id.clone(),
                expected: Some(prior.serial),
                found,
            }
            .into());
        }
        Ok(())
    }

    async fn create(
        &self,
        node: &ResourceNode,
        desired: Attributes,
        expected_serial: Option<u64>,
    ) -> Result<StateRecord, NodeError> {
        let attributes = self
            .call(ApplyRequest::create(self.change.id.clone(), desired))
            .await?;
        self.commit(node, attributes, expected_serial).await
    }

    async fn commit(
        &self,
        node: &ResourceNode,
        attributes: Attributes,
        expected_serial: Option<u64>,
    ) -> Result<StateRecord, NodeError> {
        let record = StateRecord::new(node.id.clone(), attributes)
            .with_dependencies(node.dependencies.clone())
            .with_protected(node.lifecycle.prevent_destroy);
        Ok(self.store.commit(record, expected_serial).await?)
    }

    async fn destroy(&self, prior: &PriorState) -> Result<(), NodeError> {
        self.call(ApplyRequest::delete(
            self.change.id.clone(),
            prior.attributes.clone(),
        ))
        .await?;
        self.store.delete(&self.change.id, prior.serial).await?;
        Ok(())
    }

    /// Checked after commit; a failure leaves the new record in place
    fn postconditions(
        &self,
        node: &ResourceNode,
        deps: &StateSnapshot,
        record: &StateRecord,
    ) -> Result<(), NodeError> {
        let values = NodeValues {
            dependencies: deps,
            own: Some(&record.attributes),
        };
        check_conditions(&node.postconditions, &values, NodeError::PostconditionFailed)
    }
}

fn check_conditions(
    conditions: &[Condition],
    values: &dyn ValueSource,
    error: fn(String) -> NodeError,
) -> Result<(), NodeError> {
    match evaluate_all(conditions, values) {
        Verdict::Pass => Ok(()),
        Verdict::Fail(message) => Err(error(message)),
        Verdict::Deferred => Err(error("condition depends on an unknown value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::differ::create_plan;
    use keel_core::graph::GraphBuilder;
    use keel_core::provider::{BoxFuture, ChangeKind, ProviderError, ProviderResult};
    use keel_core::resource::{ResourceDecl, Value};
    use keel_core::schema::ResourceSchema;
    use keel_state::MemoryBackend;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records calls; sleeps on every call and fails for listed names
    struct SlowProvider {
        delay: Duration,
        fail: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl SlowProvider {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Provider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn apply(&self, request: ApplyRequest) -> BoxFuture<'_, ProviderResult<Attributes>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("{} {}", request.kind, request.id));
                tokio::time::sleep(self.delay).await;
                if self.fail.iter().any(|name| *name == request.id.name) {
                    return Err(ProviderError::new("boom").for_resource(request.id));
                }
                let mut attrs = request.desired;
                if request.kind == ChangeKind::Create {
                    attrs.insert("id".to_string(), json!(format!("{}-id", request.id.name)));
                }
                Ok(attrs)
            })
        }
    }

    fn store() -> StateStore {
        StateStore::new(Arc::new(MemoryBackend::new()))
    }

    fn independent(n: usize) -> Vec<ResourceDecl> {
        (0..n)
            .map(|i| ResourceDecl::new("bucket", format!("b{}", i)))
            .collect()
    }

    fn plan_for(graph: &ResourceGraph) -> Plan {
        create_plan(graph, &BTreeMap::new(), |t| ResourceSchema::new(t)).unwrap()
    }

    #[tokio::test]
    async fn test_provider_timeout() {
        let provider = Arc::new(SlowProvider::new(Duration::from_secs(5)));
        let graph = GraphBuilder::new().build(&independent(1)).unwrap();
        let plan = plan_for(&graph);

        let executor = Executor::new(provider, store())
            .with_provider_timeout(Duration::from_millis(20));
        let report = executor.execute(&graph, &plan).await;

        assert_eq!(
            report.get(&ResourceId::new("bucket", "b0")),
            Some(&NodeOutcome::Failed(NodeError::Provider(
                "timed out".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_cancel_skips_unstarted_nodes() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(5)));
        let graph = GraphBuilder::new().build(&independent(4)).unwrap();
        let plan = plan_for(&graph);

        let cancel = CancelHandle::new();
        cancel.cancel();
        let executor = Executor::new(provider.clone(), store()).with_cancel_handle(cancel);
        let report = executor.execute(&graph, &plan).await;

        assert_eq!(report.skipped_count(), 4);
        assert!(report
            .outcomes()
            .iter()
            .all(|(_, o)| *o == NodeOutcome::Skipped("cancelled".to_string())));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_ends_with_its_run() {
        let provider = Arc::new(SlowProvider::new(Duration::ZERO));
        let graph = GraphBuilder::new().build(&independent(2)).unwrap();
        let plan = plan_for(&graph);

        let cancel = CancelHandle::new();
        let executor = Executor::new(provider.clone(), store()).with_cancel_handle(cancel.clone());
        cancel.cancel();
        let report = executor.execute(&graph, &plan).await;
        assert_eq!(report.skipped_count(), 2);
        assert!(!cancel.is_cancelled());

        let report = executor.execute(&graph, &plan).await;
        assert!(report.is_success(), "{}", report);
        assert_eq!(report.applied_count(), 2);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_provider_timeout() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(5)));
        let graph = GraphBuilder::new().build(&independent(1)).unwrap();
        let plan = plan_for(&graph);

        let report = Executor::new(provider, store())
            .with_provider_timeout(None::<Duration>)
            .execute(&graph, &plan)
            .await;
        assert!(report.is_success(), "{}", report);
    }

    #[tokio::test]
    async fn test_parallelism_bound() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(30)));
        let graph = GraphBuilder::new().build(&independent(4)).unwrap();
        let plan = plan_for(&graph);

        let executor = Executor::new(provider.clone(), store()).with_parallelism(2);
        let started = tokio::time::Instant::now();
        let report = executor.execute(&graph, &plan).await;

        assert!(report.is_success());
        assert_eq!(provider.calls().len(), 4);
        // Two waves of two calls
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_independent_branch_continues_after_failure() {
        let mut provider = SlowProvider::new(Duration::ZERO);
        provider.fail = vec!["a"];
        let provider = Arc::new(provider);
        let graph = GraphBuilder::new()
            .build(&[
                ResourceDecl::new("bucket", "a"),
                ResourceDecl::new("bucket", "a_child")
                    .with_attribute("parent", Value::reference("bucket", "a", "id")),
                ResourceDecl::new("bucket", "other"),
            ])
            .unwrap();
        let plan = plan_for(&graph);

        let report = Executor::new(provider.clone(), store())
            .execute(&graph, &plan)
            .await;

        assert!(report.get(&ResourceId::new("bucket", "a")).unwrap().is_failure());
        assert_eq!(
            report.get(&ResourceId::new("bucket", "a_child")),
            Some(&NodeOutcome::Failed(NodeError::UpstreamFailed(
                ResourceId::new("bucket", "a")
            )))
        );
        assert!(report.get(&ResourceId::new("bucket", "other")).unwrap().is_success());
        assert!(!provider.calls().iter().any(|c| c.contains("a_child")));
    }

    #[tokio::test]
    async fn test_plan_for_other_graph_is_rejected() {
        let provider = Arc::new(SlowProvider::new(Duration::ZERO));
        let graph = GraphBuilder::new().build(&independent(2)).unwrap();
        let plan = plan_for(&graph);
        let other = GraphBuilder::new().build(&independent(1)).unwrap();

        let result = Executor::new(provider, store()).run(&other, &plan).await;
        assert!(matches!(result, Err(EngineError::PlanMismatch(_))));
    }
}
