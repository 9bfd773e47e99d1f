//! Listener error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenerError {
    #[error("listener is missing property {0}")]
    MissingProperty(String),

    #[error("listener property {key} has invalid value {value:?}")]
    InvalidProperty { key: String, value: String },

    #[error("no certificate bound to the listener")]
    NoCertificate,
}

pub type ListenerResult<T> = Result<T, ListenerError>;
