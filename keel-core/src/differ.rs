//! Differ - Compare desired state with committed state to generate a Plan
//!
//! Compares the desired attributes of each graph node with the last committed
//! state of that resource and classifies the required action. Resources that
//! are in state but no longer declared are planned for destruction.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use thiserror::Error;

use crate::condition::{Verdict, evaluate_all};
use crate::graph::{GraphError, ResourceGraph, ResourceNode};
use crate::plan::{
    AttributeChange, AttributeDiff, Plan, PlanAction, PlannedChange, PriorState, ReplaceOrder,
};
use crate::resource::{Attributes, Reference, ResourceId, ValueSource, combine_instances};
use crate::schema::ResourceSchema;

/// Errors that abort planning before any mutation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("{id}: precondition failed: {message}")]
    PreconditionFailed { id: ResourceId, message: String },

    #[error("{0}: prevent_destroy is set but the plan would destroy it")]
    DestroyForbidden(ResourceId),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Compute the action for one node.
///
/// `prior` is the last committed attribute set, `replace_triggered` is set
/// when a `replace_triggered_by` reference is planned to change.
pub fn diff(
    node: &ResourceNode,
    prior: Option<&Attributes>,
    schema: &ResourceSchema,
    values: &dyn ValueSource,
    replace_triggered: bool,
) -> Result<PlanAction, PlanError> {
    // Preconditions gate the diff; unknown ones are re-checked at apply time
    if let Verdict::Fail(message) = evaluate_all(&node.preconditions, values) {
        return Err(PlanError::PreconditionFailed {
            id: node.id.clone(),
            message,
        });
    }

    let Some(prior) = prior else {
        return Ok(PlanAction::Create);
    };

    let (changes, force_new) = find_changed_attributes(node, prior, schema, values);

    let action = if force_new || replace_triggered {
        let order = if node.lifecycle.create_before_destroy {
            ReplaceOrder::CreateBeforeDestroy
        } else {
            ReplaceOrder::DestroyBeforeCreate
        };
        PlanAction::Replace {
            order,
            diff: changes,
        }
    } else if changes.is_empty() {
        PlanAction::NoOp
    } else {
        PlanAction::Update(changes)
    };

    if action.is_destroying() && node.lifecycle.prevent_destroy {
        return Err(PlanError::DestroyForbidden(node.id.clone()));
    }
    Ok(action)
}

/// Find changed attributes between desired and committed state.
///
/// Returns the diff and whether any changed attribute forces replacement.
fn find_changed_attributes(
    node: &ResourceNode,
    prior: &Attributes,
    schema: &ResourceSchema,
    values: &dyn ValueSource,
) -> (AttributeDiff, bool) {
    let ignore = &node.lifecycle.ignore_changes;
    let mut changes = AttributeDiff::new();
    let mut force_new = false;

    for (name, value) in &node.attributes {
        if ignore.ignores(name) {
            continue;
        }
        let before = prior.get(name).cloned();
        let change = match value.resolve(values) {
            Some(after) => {
                let unchanged = match &before {
                    Some(b) => *b == after,
                    None => after.is_null(),
                };
                if unchanged {
                    continue;
                }
                AttributeChange::known(before, after)
            }
            None => AttributeChange::unknown(before),
        };
        force_new |= schema.requires_replacement(name);
        changes.insert(name.clone(), change);
    }

    // Configurable attributes dropped from the declaration are removals;
    // anything else only present in state is provider-assigned.
    for (name, before) in prior {
        if node.attributes.contains_key(name)
            || ignore.ignores(name)
            || !schema.is_configurable(name)
            || before.is_null()
        {
            continue;
        }
        force_new |= schema.requires_replacement(name);
        changes.insert(name.clone(), AttributeChange::removed(before.clone()));
    }

    (changes, force_new)
}

/// Values visible while planning: committed state of dependencies, masked by
/// what the plan is about to change.
struct PlanningValues<'a> {
    graph: &'a ResourceGraph,
    priors: &'a BTreeMap<ResourceId, PriorState>,
    planned: &'a BTreeMap<ResourceId, PlanAction>,
}

impl PlanningValues<'_> {
    fn known_value(&self, id: &ResourceId, reference: &Reference) -> Option<serde_json::Value> {
        let prior = self.priors.get(id)?;
        match self.planned.get(id)? {
            PlanAction::NoOp => Some(reference.project(&prior.attributes)),
            PlanAction::Update(changes) => {
                let attr = reference.attribute.as_ref()?;
                match changes.get(attr) {
                    Some(change) => change.after_known(),
                    None => Some(reference.project(&prior.attributes)),
                }
            }
            PlanAction::Create | PlanAction::Destroy | PlanAction::Replace { .. } => None,
        }
    }

    /// A `replace_triggered_by` reference is planned to change
    fn replace_triggered(&self, node: &ResourceNode) -> bool {
        node.lifecycle.replace_triggered_by.iter().any(|reference| {
            self.planned
                .iter()
                .filter(|(id, _)| reference.targets(id))
                .any(|(_, action)| match action {
                    PlanAction::NoOp | PlanAction::Destroy => false,
                    PlanAction::Create | PlanAction::Replace { .. } => true,
                    PlanAction::Update(changes) => reference
                        .attribute
                        .as_ref()
                        .is_none_or(|attr| changes.contains_key(attr)),
                })
        })
    }
}

impl ValueSource for PlanningValues<'_> {
    fn lookup(&self, reference: &Reference) -> Option<serde_json::Value> {
        let found = self
            .graph
            .nodes()
            .filter(|n| reference.targets(&n.id))
            .map(|n| (n.id.clone(), self.known_value(&n.id, reference)))
            .collect();
        combine_instances(reference, found)
    }
}

/// Compute the plan for a graph against committed state.
///
/// Nodes are diffed in execution order so that every dependency's action is
/// known when its dependents are planned. State entries that are no longer in
/// the graph are destroyed, dependents first.
pub fn create_plan<F>(
    graph: &ResourceGraph,
    priors: &BTreeMap<ResourceId, PriorState>,
    schema_of: F,
) -> Result<Plan, PlanError>
where
    F: Fn(&str) -> ResourceSchema,
{
    let mut plan = Plan::new();
    let mut planned: BTreeMap<ResourceId, PlanAction> = BTreeMap::new();

    for node in graph.nodes() {
        let prior = priors.get(&node.id);
        let action = {
            let values = PlanningValues {
                graph,
                priors,
                planned: &planned,
            };
            let triggered = prior.is_some() && values.replace_triggered(node);
            diff(
                node,
                prior.map(|p| &p.attributes),
                &schema_of(&node.id.resource_type),
                &values,
                triggered,
            )?
        };
        debug!("Planned {:?} for {}", action.kind(), node.id);

        planned.insert(node.id.clone(), action.clone());
        plan.add(PlannedChange {
            id: node.id.clone(),
            action,
            prior: prior.cloned(),
            dependencies: node.dependencies.clone(),
        });
    }

    let orphans: Vec<&PriorState> = priors
        .values()
        .filter(|p| !graph.contains(&p.id))
        .collect();
    for prior in destroy_order(orphans) {
        if prior.protected {
            return Err(PlanError::DestroyForbidden(prior.id.clone()));
        }
        plan.add(destroy_change(prior));
    }

    Ok(plan)
}

/// Plan the destruction of every resource in state.
///
/// A resource is protected when its recorded state or its current declaration
/// sets `prevent_destroy`.
pub fn create_destroy_plan(
    graph: &ResourceGraph,
    priors: &BTreeMap<ResourceId, PriorState>,
) -> Result<Plan, PlanError> {
    let mut plan = Plan::new();
    for prior in destroy_order(priors.values().collect()) {
        let declared_protected = graph
            .node(&prior.id)
            .is_some_and(|n| n.lifecycle.prevent_destroy);
        if prior.protected || declared_protected {
            return Err(PlanError::DestroyForbidden(prior.id.clone()));
        }
        plan.add(destroy_change(prior));
    }
    Ok(plan)
}

fn destroy_change(prior: &PriorState) -> PlannedChange {
    PlannedChange {
        id: prior.id.clone(),
        action: PlanAction::Destroy,
        prior: Some(prior.clone()),
        dependencies: prior.dependencies.clone(),
    }
}

/// Order resources so that dependents come before their dependencies
fn destroy_order(priors: Vec<&PriorState>) -> Vec<&PriorState> {
    let ids: BTreeSet<&ResourceId> = priors.iter().map(|p| &p.id).collect();
    let mut blocking: BTreeMap<&ResourceId, usize> = priors.iter().map(|p| (&p.id, 0)).collect();
    for prior in &priors {
        for dep in prior.dependencies.iter().filter(|d| ids.contains(d)) {
            if let Some(count) = blocking.get_mut(dep) {
                *count += 1;
            }
        }
    }

    let by_id: BTreeMap<&ResourceId, &PriorState> = priors.iter().map(|p| (&p.id, *p)).collect();
    let mut ready: BTreeSet<&ResourceId> = blocking
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut ordered = Vec::with_capacity(priors.len());

    while let Some(id) = ready.pop_first() {
        let Some(&prior) = by_id.get(id) else {
            continue;
        };
        ordered.push(prior);
        for dep in prior.dependencies.iter().filter(|d| ids.contains(d)) {
            if let Some(count) = blocking.get_mut(dep) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.insert(dep);
                }
            }
        }
    }

    // Recorded dependencies should never be cyclic; keep whatever is left
    for prior in priors {
        if !ordered.iter().any(|p| p.id == prior.id) {
            ordered.push(prior);
        }
    }
    ordered
}
