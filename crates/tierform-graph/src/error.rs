//! Graph error types.

use thiserror::Error;

/// Structural errors found while building the graph.
///
/// All of them are raised before any provisioning call is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),

    #[error("{resource} depends on unknown resource {dependency}")]
    UnknownDependency { resource: String, dependency: String },

    #[error("{0} depends on itself")]
    SelfReference(String),

    #[error("{resource} references {reference}, which is not an output of that resource")]
    UnknownAttribute { resource: String, reference: String },

    /// The path starts and ends with the same resource.
    #[error("circular dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
}

pub type GraphResult<T> = Result<T, GraphError>;
