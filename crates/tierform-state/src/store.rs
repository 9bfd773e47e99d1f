//! StateStore: redb-backed state persistence for tierform.
//!
//! Provides typed CRUD operations over resource records, reconciled users,
//! target health and run history. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [RESOURCES, USERS, TARGETS, RUNS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix`, in key order.
    fn list<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert or update a resource record.
    pub fn put_resource(&self, record: &ResourceRecord) -> StateResult<()> {
        self.put(RESOURCES, &record.name, record)?;
        debug!(resource = %record.name, status = ?record.status, "resource record stored");
        Ok(())
    }

    pub fn get_resource(&self, name: &str) -> StateResult<Option<ResourceRecord>> {
        self.get(RESOURCES, name)
    }

    pub fn list_resources(&self) -> StateResult<Vec<ResourceRecord>> {
        self.list(RESOURCES, "")
    }

    /// Delete a resource record. Returns true if it existed.
    pub fn delete_resource(&self, name: &str) -> StateResult<bool> {
        let existed = self.remove(RESOURCES, name)?;
        debug!(resource = %name, existed, "resource record deleted");
        Ok(existed)
    }

    // ── Users ──────────────────────────────────────────────────────

    pub fn put_user(&self, record: &UserRecord) -> StateResult<()> {
        self.put(USERS, &record.table_key(), record)
    }

    pub fn get_user(&self, pool_id: &str, username: &str) -> StateResult<Option<UserRecord>> {
        self.get(USERS, &user_key(pool_id, username))
    }

    pub fn list_users_for_pool(&self, pool_id: &str) -> StateResult<Vec<UserRecord>> {
        self.list(USERS, &format!("{pool_id}/"))
    }

    pub fn delete_user(&self, pool_id: &str, username: &str) -> StateResult<bool> {
        self.remove(USERS, &user_key(pool_id, username))
    }

    // ── Targets ────────────────────────────────────────────────────

    pub fn put_target(&self, record: &TargetRecord) -> StateResult<()> {
        self.put(TARGETS, &record.table_key(), record)
    }

    pub fn list_targets_for_group(&self, group: &str) -> StateResult<Vec<TargetRecord>> {
        self.list(TARGETS, &format!("{group}:"))
    }

    pub fn delete_target(&self, group: &str, target_id: &str) -> StateResult<bool> {
        self.remove(TARGETS, &format!("{group}:{target_id}"))
    }

    // ── Runs ───────────────────────────────────────────────────────

    pub fn put_run(&self, record: &RunRecord) -> StateResult<()> {
        self.put(RUNS, &record.table_key(), record)
    }

    /// Most recent runs first, at most `limit`.
    pub fn recent_runs(&self, limit: usize) -> StateResult<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self.list(RUNS, "")?;
        runs.reverse();
        runs.truncate(limit);
        Ok(runs)
    }
}
