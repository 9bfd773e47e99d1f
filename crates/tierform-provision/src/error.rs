//! Provisioning error types.

use thiserror::Error;

use tierform_graph::GraphError;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Rejected before any provisioning call.
    #[error("circular dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Any other structural graph error, also rejected up front.
    #[error("invalid resource graph: {0}")]
    InvalidGraph(GraphError),

    /// Fatal to the run. `blocked` lists dependents left unprovisioned.
    #[error("provisioning failed at {resource}: {reason}{}", blocked_suffix(.blocked))]
    ProvisioningFailed {
        resource: String,
        reason: String,
        blocked: Vec<String>,
    },

    #[error("run cancelled with {} resources not reached", .pending.len())]
    Cancelled {
        completed: Vec<String>,
        pending: Vec<String>,
    },

    #[error("state store error: {0}")]
    State(#[from] tierform_state::StateError),
}

fn blocked_suffix(blocked: &[String]) -> String {
    if blocked.is_empty() {
        String::new()
    } else {
        format!(" (blocked: {})", blocked.join(", "))
    }
}

impl From<GraphError> for ProvisionError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CircularDependency { cycle } => ProvisionError::CircularDependency { cycle },
            other => ProvisionError::InvalidGraph(other),
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
