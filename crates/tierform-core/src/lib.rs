pub mod config;
pub mod handler;
pub mod reference;
pub mod resource;
pub mod secret;
pub mod topology;

pub use config::{ConfigError, StackConfig, parse_duration};
pub use handler::{HandlerError, HandlerResult, Readiness, ResourceHandler};
pub use reference::{AttrRef, RefError};
pub use resource::{ResolvedResource, ResourceKind, ResourceSpec};
pub use secret::{SecretConsumer, SecretReader, SecretValue};
