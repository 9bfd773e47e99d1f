//! tierform-provision: brings a declared stack to ready, and tears it down.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── DependencyGraph + Schedule   (tierform-graph)
//!   ├── HandlerSet
//!   │     ├── default: dyn ResourceHandler (managed services)
//!   │     └── ReconciledUser → ReconciledUserHandler (tierform-identity)
//!   ├── retry_with_backoff           (transient handler errors)
//!   └── StateStore                   (ResourceRecord, RunRecord)
//! ```
//!
//! [`SimulatedCloud`] stands in for the managed services, the credential
//! store and the identity directory in tests and local runs.

pub mod credentials;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod outputs;
pub mod retry;
pub mod sim;

pub use credentials::generate_password;
pub use error::{ProvisionError, ProvisionResult};
pub use handlers::HandlerSet;
pub use orchestrator::{
    Change, Orchestrator, Plan, PlanAction, PlannedStep, ProvisionSettings, RunReport, TimelineEvent,
};
pub use outputs::StackOutputs;
pub use retry::{RetryConfig, retry_with_backoff};
pub use sim::{SimCall, SimOp, SimulatedCloud};
