//! Per-node outcome of an apply run

use std::fmt;

use keel_core::plan::ActionKind;
use keel_core::resource::ResourceId;

use crate::error::NodeError;

/// Outcome of one plan entry
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Applied(ActionKind),
    NoOp,
    /// Never started
    Skipped(String),
    Failed(NodeError),
}

impl NodeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeOutcome::Failed(_))
    }

    /// Whether dependents may proceed
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Applied(_) | NodeOutcome::NoOp)
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutcome::Applied(kind) => {
                let done = match kind {
                    ActionKind::Create => "created",
                    ActionKind::Update => "updated",
                    ActionKind::Destroy => "destroyed",
                    ActionKind::Replace => "replaced",
                };
                f.write_str(done)
            }
            NodeOutcome::NoOp => f.write_str("unchanged"),
            NodeOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            NodeOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Outcome of every plan entry, in plan order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    outcomes: Vec<(ResourceId, NodeOutcome)>,
}

impl ApplyReport {
    pub fn new(outcomes: Vec<(ResourceId, NodeOutcome)>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[(ResourceId, NodeOutcome)] {
        &self.outcomes
    }

    pub fn get(&self, id: &ResourceId) -> Option<&NodeOutcome> {
        self.outcomes
            .iter()
            .find(|(entry, _)| entry == id)
            .map(|(_, outcome)| outcome)
    }

    /// No node failed or was skipped
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_success())
    }

    pub fn applied_count(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Applied(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(NodeOutcome::is_failure)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Skipped(_)))
    }

    fn count(&self, predicate: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, outcome) in self.outcomes.iter().filter(|(_, o)| *o != NodeOutcome::NoOp) {
            writeln!(f, "  {}: {}", id, outcome)?;
        }
        if self.is_success() {
            write!(
                f,
                "Apply complete! {} changes applied.",
                self.applied_count()
            )
        } else {
            write!(
                f,
                "Apply failed. {} succeeded, {} failed, {} skipped.",
                self.applied_count(),
                self.failed_count(),
                self.skipped_count()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            NodeOutcome::Applied(ActionKind::Create).to_string(),
            "created"
        );
        assert_eq!(
            NodeOutcome::Applied(ActionKind::Replace).to_string(),
            "replaced"
        );
        assert_eq!(
            NodeOutcome::Applied(ActionKind::Update).to_string(),
            "updated"
        );
        assert_eq!(
            NodeOutcome::Applied(ActionKind::Destroy).to_string(),
            "destroyed"
        );
        assert_eq!(
            NodeOutcome::Skipped("cancelled".to_string()).to_string(),
            "skipped (cancelled)"
        );
    }

    #[test]
    fn test_report_summary() {
        let report = ApplyReport::new(vec![
            (
                ResourceId::new("vpc", "main"),
                NodeOutcome::Applied(ActionKind::Create),
            ),
            (ResourceId::new("subnet", "a"), NodeOutcome::NoOp),
        ]);
        assert!(report.is_success());
        assert_eq!(
            report.to_string(),
            "  vpc.main: created\nApply complete! 1 changes applied."
        );

        let report = ApplyReport::new(vec![
            (
                ResourceId::new("vpc", "main"),
                NodeOutcome::Failed(NodeError::Provider("boom".to_string())),
            ),
            (
                ResourceId::new("subnet", "a"),
                NodeOutcome::Failed(NodeError::UpstreamFailed(ResourceId::new("vpc", "main"))),
            ),
        ]);
        assert!(!report.is_success());
        assert_eq!(report.failed_count(), 2);
        assert!(
            report
                .to_string()
                .ends_with("Apply failed. 0 succeeded, 2 failed, 0 skipped.")
        );
    }
}
