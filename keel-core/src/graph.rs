//! Graph - Build the resource dependency graph
//!
//! Declarations are expanded (`count` / `for_each`) into resource nodes. Edges
//! come from explicit `depends_on` entries and from every reference found in
//! attribute expressions, conditions and `replace_triggered_by`. The graph is
//! validated with Kahn's algorithm, which also yields the execution order.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use thiserror::Error;

use crate::condition::Condition;
use crate::resource::{
    Expansion, InstanceKey, Lifecycle, NoValues, Reference, Repetition, ResourceDecl,
    ResourceId, Value, ValueSource,
};

/// Errors that abort graph construction
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Dependency cycle detected between: {}", join_ids(.0))]
    CycleDetected(Vec<ResourceId>),

    #[error("{from}: reference to undeclared resource {reference}")]
    UnresolvedReference { from: ResourceId, reference: String },

    #[error("{id}: {argument} depends on a value that is not known until apply")]
    UnknownValueInKey { id: ResourceId, argument: String },

    #[error("Duplicate resource {0}")]
    DuplicateResource(ResourceId),

    #[error("{id}: invalid {argument}: {message}")]
    InvalidExpansion {
        id: ResourceId,
        argument: String,
        message: String,
    },
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A declaration instance inside the graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub attributes: BTreeMap<String, Value>,
    /// Explicit and inferred dependencies
    pub dependencies: BTreeSet<ResourceId>,
    pub lifecycle: Lifecycle,
    pub preconditions: Vec<Condition>,
    pub postconditions: Vec<Condition>,
    /// Some attribute refers to a value that is unknown until apply time
    pub deferred: bool,
}

impl ResourceNode {
    /// References used by the desired attributes
    pub fn attribute_references(&self) -> impl Iterator<Item = &Reference> {
        self.attributes.values().flat_map(|v| v.references())
    }
}

/// Directed acyclic graph of resource nodes
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<ResourceId, ResourceNode>,
    /// Reverse edges: dependency -> nodes that depend on it
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    /// Dependencies before dependents
    order: Vec<ResourceId>,
}

impl ResourceGraph {
    /// Execution order: every node appears after all of its dependencies
    pub fn order(&self) -> &[ResourceId] {
        &self.order
    }

    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Nodes in execution order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|n| n.dependencies.iter())
    }

    /// Get resources that depend directly on this resource
    pub fn dependents_of(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Resources without dependencies
    pub fn root_resources(&self) -> Vec<&ResourceId> {
        self.nodes()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| &n.id)
            .collect()
    }
}

/// Builds a [`ResourceGraph`] from declarations
#[derive(Default)]
pub struct GraphBuilder<'a> {
    known: Option<&'a dyn ValueSource>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values already known before planning (typically committed state).
    ///
    /// Used to resolve `count` / `for_each` expressions that reference other
    /// resources and to decide which nodes are deferred.
    pub fn with_known(mut self, known: &'a dyn ValueSource) -> Self {
        self.known = Some(known);
        self
    }

    fn known(&self) -> &dyn ValueSource {
        match self.known {
            Some(known) => known,
            None => &NoValues,
        }
    }

    pub fn build(&self, decls: &[ResourceDecl]) -> Result<ResourceGraph, GraphError> {
        let mut nodes: BTreeMap<ResourceId, ResourceNode> = BTreeMap::new();
        let mut references: BTreeMap<ResourceId, Vec<Reference>> = BTreeMap::new();

        for decl in decls {
            for (id, expansion) in self.expand(decl)? {
                let node = materialize(decl, id, &expansion)?;
                let refs = collect_references(decl, &node);
                if nodes.contains_key(&node.id) {
                    return Err(GraphError::DuplicateResource(node.id));
                }
                references.insert(node.id.clone(), refs);
                nodes.insert(node.id.clone(), node);
            }
        }

        // Resolve references into edges; anything unresolved fails closed
        let mut dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();
        for (id, refs) in &references {
            let mut dependencies = BTreeSet::new();
            for reference in refs {
                let targets: Vec<&ResourceId> =
                    nodes.keys().filter(|t| reference.targets(t)).collect();
                if targets.is_empty() {
                    return Err(GraphError::UnresolvedReference {
                        from: id.clone(),
                        reference: reference.to_string(),
                    });
                }
                for target in targets {
                    dependencies.insert(target.clone());
                    dependents
                        .entry(target.clone())
                        .or_default()
                        .insert(id.clone());
                }
            }
            if let Some(node) = nodes.get_mut(id) {
                node.dependencies = dependencies;
            }
        }

        let known = self.known();
        for node in nodes.values_mut() {
            let deferred = node
                .attribute_references()
                .any(|r| known.lookup(r).is_none());
            node.deferred = deferred;
        }

        let order = topological_order(&nodes, &dependents)?;
        debug!("Built resource graph with {} nodes", order.len());

        Ok(ResourceGraph {
            nodes,
            dependents,
            order,
        })
    }

    fn expand(&self, decl: &ResourceDecl) -> Result<Vec<(ResourceId, Expansion)>, GraphError> {
        use serde_json::Value as Json;

        let invalid = |argument: &str, message: String| GraphError::InvalidExpansion {
            id: decl.id.clone(),
            argument: argument.to_string(),
            message,
        };

        match &decl.repetition {
            Repetition::Single => Ok(vec![(decl.id.clone(), Expansion::Single)]),
            Repetition::Count(expr) => {
                let value = self.resolve_key(decl, "count", expr)?;
                let count = value.as_u64().ok_or_else(|| {
                    invalid(
                        "count",
                        format!("expected a non-negative integer, got {}", value),
                    )
                })?;
                Ok((0..count)
                    .map(|i| {
                        (
                            decl.id.clone().with_key(InstanceKey::Index(i)),
                            Expansion::Count(i),
                        )
                    })
                    .collect())
            }
            Repetition::ForEach(expr) => match self.resolve_key(decl, "for_each", expr)? {
                Json::Object(map) => Ok(map
                    .into_iter()
                    .map(|(key, value)| {
                        (
                            decl.id.clone().with_key(InstanceKey::Name(key.clone())),
                            Expansion::Each { key, value },
                        )
                    })
                    .collect()),
                Json::Array(items) => {
                    let mut keys = BTreeSet::new();
                    for item in items {
                        match item {
                            Json::String(s) => {
                                keys.insert(s);
                            }
                            other => {
                                return Err(invalid(
                                    "for_each",
                                    format!("list elements must be strings, got {}", other),
                                ));
                            }
                        }
                    }
                    Ok(keys
                        .into_iter()
                        .map(|key| {
                            (
                                decl.id.clone().with_key(InstanceKey::Name(key.clone())),
                                Expansion::Each {
                                    value: Json::String(key.clone()),
                                    key,
                                },
                            )
                        })
                        .collect())
                }
                other => Err(invalid(
                    "for_each",
                    format!("expected a map or a list of strings, got {}", other),
                )),
            },
        }
    }

    fn resolve_key(
        &self,
        decl: &ResourceDecl,
        argument: &str,
        expr: &Value,
    ) -> Result<serde_json::Value, GraphError> {
        expr.resolve(self.known())
            .ok_or_else(|| GraphError::UnknownValueInKey {
                id: decl.id.clone(),
                argument: argument.to_string(),
            })
    }
}

fn materialize(
    decl: &ResourceDecl,
    id: ResourceId,
    expansion: &Expansion,
) -> Result<ResourceNode, GraphError> {
    let invalid = |message: String| GraphError::InvalidExpansion {
        id: id.clone(),
        argument: "expression".to_string(),
        message,
    };
    let conditions = |conditions: &[Condition]| {
        conditions
            .iter()
            .map(|c| {
                c.check.substitute(expansion).map(|check| Condition {
                    check,
                    error_message: c.error_message.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
    };

    let attributes = decl
        .attributes
        .iter()
        .map(|(k, v)| v.substitute(expansion).map(|v| (k.clone(), v)))
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map_err(&invalid)?;
    let preconditions = conditions(&decl.preconditions).map_err(&invalid)?;
    let postconditions = conditions(&decl.postconditions).map_err(&invalid)?;

    Ok(ResourceNode {
        id,
        attributes,
        dependencies: BTreeSet::new(),
        lifecycle: decl.lifecycle.clone(),
        preconditions,
        postconditions,
        deferred: false,
    })
}

/// Every reference that creates an edge for this node
fn collect_references(decl: &ResourceDecl, node: &ResourceNode) -> Vec<Reference> {
    let mut refs: Vec<Reference> = node.attribute_references().cloned().collect();
    refs.extend(decl.depends_on.iter().cloned());
    for condition in node.preconditions.iter().chain(&node.postconditions) {
        refs.extend(condition.check.references().into_iter().cloned());
    }
    refs.extend(node.lifecycle.replace_triggered_by.iter().cloned());
    match &decl.repetition {
        Repetition::Count(expr) | Repetition::ForEach(expr) => {
            refs.extend(expr.references().into_iter().cloned());
        }
        Repetition::Single => {}
    }
    refs
}

/// Kahn's algorithm; ties are broken by identity for a deterministic order
fn topological_order(
    nodes: &BTreeMap<ResourceId, ResourceNode>,
    dependents: &BTreeMap<ResourceId, BTreeSet<ResourceId>>,
) -> Result<Vec<ResourceId>, GraphError> {
    let mut in_degree: BTreeMap<&ResourceId, usize> = nodes
        .iter()
        .map(|(id, node)| (id, node.dependencies.len()))
        .collect();
    let mut ready: BTreeSet<&ResourceId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    // Nodes left over are on a cycle or downstream of one; peel off the
    // downstream ones so the error names only the cycle members.
    let mut remaining: BTreeSet<&ResourceId> = in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(id, _)| id)
        .collect();
    loop {
        let downstream: Vec<&ResourceId> = remaining
            .iter()
            .filter(|id| {
                !dependents
                    .get(**id)
                    .into_iter()
                    .flatten()
                    .any(|d| remaining.contains(d))
            })
            .copied()
            .collect();
        if downstream.is_empty() {
            break;
        }
        for id in downstream {
            remaining.remove(id);
        }
    }

    Err(GraphError::CycleDetected(
        remaining.into_iter().cloned().collect(),
    ))
}
