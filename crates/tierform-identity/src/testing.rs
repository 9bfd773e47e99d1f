//! In-memory directory used by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use tierform_core::SecretValue;

use crate::directory::{DirectoryError, DirectoryResult, IdentityDirectory, UserStatus};

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub status: UserStatus,
    pub attributes: BTreeMap<String, String>,
    pub password_fingerprint: String,
    pub permanent_password: bool,
}

#[derive(Default)]
pub struct InMemoryDirectory {
    pools: BTreeSet<String>,
    users: Mutex<BTreeMap<(String, String), StoredUser>>,
    calls: Mutex<Vec<String>>,
    initial_status: Option<UserStatus>,
}

impl InMemoryDirectory {
    pub fn with_pool(mut self, pool_id: &str) -> Self {
        self.pools.insert(pool_id.to_string());
        self
    }

    /// Status newly created users start in.
    pub fn starting_as(mut self, status: UserStatus) -> Self {
        self.initial_status = Some(status);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn user(&self, pool_id: &str, username: &str) -> Option<StoredUser> {
        self.users
            .lock()
            .unwrap()
            .get(&(pool_id.to_string(), username.to_string()))
            .cloned()
    }

    /// Put a user in place behind the reconciler's back.
    pub fn insert_user(&self, pool_id: &str, username: &str) {
        self.users.lock().unwrap().insert(
            (pool_id.to_string(), username.to_string()),
            StoredUser {
                status: UserStatus::Confirmed,
                attributes: BTreeMap::new(),
                password_fingerprint: String::new(),
                permanent_password: true,
            },
        );
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_pool(&self, pool_id: &str) -> DirectoryResult<()> {
        if self.pools.contains(pool_id) {
            Ok(())
        } else {
            Err(DirectoryError::NotFound(format!("pool {pool_id}")))
        }
    }

    fn with_user<T>(
        &self,
        pool_id: &str,
        username: &str,
        f: impl FnOnce(&mut StoredUser) -> T,
    ) -> DirectoryResult<T> {
        self.check_pool(pool_id)?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&(pool_id.to_string(), username.to_string()))
            .ok_or_else(|| DirectoryError::NotFound(format!("user {username}")))?;
        Ok(f(user))
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn admin_create_user(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
        temporary_password: &SecretValue,
    ) -> DirectoryResult<UserStatus> {
        self.check_pool(pool_id)?;
        self.record(format!("create {pool_id}/{username}"));
        let mut users = self.users.lock().unwrap();
        let key = (pool_id.to_string(), username.to_string());
        if users.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists(username.to_string()));
        }
        let status = self.initial_status.unwrap_or(UserStatus::ForceChangePassword);
        users.insert(
            key,
            StoredUser {
                status,
                attributes: attributes.clone(),
                password_fingerprint: temporary_password.fingerprint(),
                permanent_password: false,
            },
        );
        Ok(status)
    }

    async fn admin_delete_user(&self, pool_id: &str, username: &str) -> DirectoryResult<()> {
        self.check_pool(pool_id)?;
        self.record(format!("delete {pool_id}/{username}"));
        self.users
            .lock()
            .unwrap()
            .remove(&(pool_id.to_string(), username.to_string()))
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NotFound(format!("user {username}")))
    }

    async fn admin_set_user_password(
        &self,
        pool_id: &str,
        username: &str,
        password: &SecretValue,
        permanent: bool,
    ) -> DirectoryResult<()> {
        self.record(format!("set-password {pool_id}/{username}"));
        self.with_user(pool_id, username, |user| {
            user.password_fingerprint = password.fingerprint();
            user.permanent_password = permanent;
            if permanent {
                user.status = UserStatus::Confirmed;
            }
        })
    }

    async fn admin_confirm_sign_up(&self, pool_id: &str, username: &str) -> DirectoryResult<()> {
        self.record(format!("confirm {pool_id}/{username}"));
        self.with_user(pool_id, username, |user| {
            if user.status == UserStatus::Unconfirmed {
                user.status = UserStatus::ForceChangePassword;
            }
        })
    }

    async fn admin_update_user_attributes(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
    ) -> DirectoryResult<()> {
        self.record(format!("update-attributes {pool_id}/{username}"));
        self.with_user(pool_id, username, |user| {
            user.attributes.extend(attributes.clone());
        })
    }
}
