//! tierform-state: embedded state store for tierform.
//!
//! Backed by [redb](https://docs.rs/redb), records what the orchestrator has
//! provisioned: resource records, reconciled directory users, target health
//! and run history.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{pool_id}/{username}`, `{group}:{target}`) enable
//! prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
