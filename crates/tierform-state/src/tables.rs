//! redb table definitions for the tierform state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Resource records keyed by logical resource name.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Reconciled directory users keyed by `{pool_id}/{username}`.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Target health keyed by `{group}:{target_id}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Run history keyed by `{started_at:020}-{run_id}` so iteration is chronological.
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");
