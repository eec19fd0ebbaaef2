//! Engine errors

use keel_core::differ::PlanError;
use keel_core::graph::GraphError;
use keel_core::resource::ResourceId;
use keel_state::StateError;
use thiserror::Error;

/// Why a single node failed during apply
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The resource was applied and committed, but a postcondition does not hold
    #[error("postcondition failed: {0}")]
    PostconditionFailed(String),

    #[error("prevent_destroy is set")]
    DestroyForbidden,

    #[error("provider error: {0}")]
    Provider(String),

    /// State changed since the plan was computed
    #[error("{0}")]
    VersionConflict(String),

    #[error("dependency {0} failed")]
    UpstreamFailed(ResourceId),

    #[error("value of {0} is still unknown")]
    UnknownValue(String),

    #[error("state error: {0}")]
    Store(String),
}

impl From<StateError> for NodeError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::VersionConflict { .. } => NodeError::VersionConflict(err.to_string()),
            other => NodeError::Store(other.to_string()),
        }
    }
}

/// Errors that stop a whole run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The plan does not belong to the graph it is applied with
    #[error("Plan does not match graph: {0}")]
    PlanMismatch(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
