//! Health error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("target {target} is not registered in {group}")]
    UnknownTarget { group: String, target: String },

    #[error("invalid health check: {0}")]
    InvalidConfig(String),

    #[error("state store error: {0}")]
    State(#[from] tierform_state::StateError),
}

pub type HealthResult<T> = Result<T, HealthError>;
