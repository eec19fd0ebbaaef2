//! Plan - Ordered per-resource actions
//!
//! A Plan is computed fresh on every planning pass and never persisted.
//! No side effects occur until the Plan is applied.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::resource::{Attributes, ResourceId};

/// Change of a single attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub before: Option<serde_json::Value>,
    /// New value; `None` when removed or not known until apply
    pub after: Option<serde_json::Value>,
    /// The new value is only known after apply
    pub after_unknown: bool,
}

impl AttributeChange {
    pub fn known(before: Option<serde_json::Value>, after: serde_json::Value) -> Self {
        Self {
            before,
            after: Some(after),
            after_unknown: false,
        }
    }

    pub fn unknown(before: Option<serde_json::Value>) -> Self {
        Self {
            before,
            after: None,
            after_unknown: true,
        }
    }

    pub fn removed(before: serde_json::Value) -> Self {
        Self {
            before: Some(before),
            after: None,
            after_unknown: false,
        }
    }

    /// The planned value, if it is known at plan time
    pub fn after_known(&self) -> Option<serde_json::Value> {
        if self.after_unknown {
            None
        } else {
            Some(self.after.clone().unwrap_or(serde_json::Value::Null))
        }
    }
}

/// Attribute name -> change
pub type AttributeDiff = BTreeMap<String, AttributeChange>;

/// Ordering of the two halves of a replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplaceOrder {
    DestroyBeforeCreate,
    CreateBeforeDestroy,
}

/// Action planned for one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanAction {
    NoOp,
    Create,
    Update(AttributeDiff),
    Destroy,
    Replace {
        order: ReplaceOrder,
        diff: AttributeDiff,
    },
}

/// Kind of a mutating action, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionKind {
    Create,
    Update,
    Destroy,
    Replace,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Destroy => "destroy",
            ActionKind::Replace => "replace",
        };
        f.write_str(s)
    }
}

impl PlanAction {
    /// Returns whether this action changes anything
    pub fn is_change(&self) -> bool {
        !matches!(self, PlanAction::NoOp)
    }

    /// Returns whether this action destroys an existing object
    pub fn is_destroying(&self) -> bool {
        matches!(self, PlanAction::Destroy | PlanAction::Replace { .. })
    }

    pub fn kind(&self) -> Option<ActionKind> {
        match self {
            PlanAction::NoOp => None,
            PlanAction::Create => Some(ActionKind::Create),
            PlanAction::Update(_) => Some(ActionKind::Update),
            PlanAction::Destroy => Some(ActionKind::Destroy),
            PlanAction::Replace { .. } => Some(ActionKind::Replace),
        }
    }

    /// The attribute diff carried by updates and replacements
    pub fn diff(&self) -> Option<&AttributeDiff> {
        match self {
            PlanAction::Update(diff) | PlanAction::Replace { diff, .. } => Some(diff),
            _ => None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            PlanAction::NoOp => " ",
            PlanAction::Create => "+",
            PlanAction::Update(_) => "~",
            PlanAction::Destroy => "-",
            PlanAction::Replace {
                order: ReplaceOrder::DestroyBeforeCreate,
                ..
            } => "-/+",
            PlanAction::Replace {
                order: ReplaceOrder::CreateBeforeDestroy,
                ..
            } => "+/-",
        }
    }
}

/// Last committed state of a resource, as seen by the planner
#[derive(Debug, Clone, PartialEq)]
pub struct PriorState {
    pub id: ResourceId,
    /// Serial the apply must find in the store to commit (optimistic lock)
    pub serial: u64,
    pub attributes: Attributes,
    /// Dependencies recorded when the resource was last applied
    pub dependencies: BTreeSet<ResourceId>,
    /// Recorded `prevent_destroy`
    pub protected: bool,
}

/// One entry of a plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub id: ResourceId,
    pub action: PlanAction,
    /// State the action was computed against; absent for creates
    pub prior: Option<PriorState>,
    /// Dependencies that order this change relative to the others
    pub dependencies: BTreeSet<ResourceId>,
}

impl fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action.symbol(), self.id)?;
        if let Some(diff) = self.action.diff() {
            for (name, change) in diff {
                let before = change
                    .before
                    .as_ref()
                    .map_or_else(|| "(none)".to_string(), ToString::to_string);
                let after = if change.after_unknown {
                    "(known after apply)".to_string()
                } else {
                    change
                        .after
                        .as_ref()
                        .map_or_else(|| "(removed)".to_string(), ToString::to_string)
                };
                write!(f, "\n    {}: {} -> {}", name, before, after)?;
            }
        }
        Ok(())
    }
}

/// Plan containing one action per resource, in execution order
#[derive(Debug, Clone, Default)]
pub struct Plan {
    changes: Vec<PlannedChange>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, change: PlannedChange) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[PlannedChange] {
        &self.changes
    }

    pub fn get(&self, id: &ResourceId) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| &c.id == id)
    }

    /// Ordered (identity, action) pairs
    pub fn actions(&self) -> impl Iterator<Item = (&ResourceId, &PlanAction)> {
        self.changes.iter().map(|c| (&c.id, &c.action))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of mutating actions
    pub fn mutation_count(&self) -> usize {
        self.changes.iter().filter(|c| c.action.is_change()).count()
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.action {
                PlanAction::NoOp => summary.unchanged += 1,
                PlanAction::Create => summary.create += 1,
                PlanAction::Update(_) => summary.update += 1,
                PlanAction::Destroy => summary.destroy += 1,
                PlanAction::Replace { .. } => summary.replace += 1,
            }
        }
        summary
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in self.changes.iter().filter(|c| c.action.is_change()) {
            writeln!(f, "{}", change)?;
        }
        write!(f, "{}", self.summary())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub unchanged: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to destroy",
            self.create, self.update, self.replace, self.destroy
        )
    }
}
