//! tierform-identity: reconciliation of one directory user.
//!
//! The identity provider's declarative model manages the pool, domain and
//! client, but not individual users. This crate provisions the bootstrap
//! admin user imperatively: on create it calls the admin create API, on
//! delete the inverse, and records the lifecycle so that repeated calls
//! are no-ops.
//!
//! # Architecture
//!
//! ```text
//! ReconciledUserHandler (ResourceHandler)
//!   ├── SecretReader (temporary password, read as IdentityReconciler)
//!   └── UserReconciler
//!         ├── ScopedDirectory (AdminCapability on exactly one pool)
//!         │     └── dyn IdentityDirectory
//!         └── StateStore (UserRecord: ABSENT → CREATING → PRESENT → DELETING)
//! ```

pub mod capability;
pub mod directory;
pub mod handler;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{AdminAction, AdminCapability, ScopedDirectory};
pub use directory::{DirectoryError, DirectoryResult, IdentityDirectory, UserStatus};
pub use handler::ReconciledUserHandler;
pub use reconciler::{CreateUser, ReconcileError, ReconcileOutcome, ReconcileResult, UserReconciler};
