//! The identity provider's admin API, as far as the reconciler needs it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tierform_core::SecretValue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user already exists: {0}")]
    AlreadyExists(String),

    /// The user, or the pool itself, does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("directory service error: {0}")]
    Service(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Account status reported by the directory after admin creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Sign-up not confirmed yet.
    Unconfirmed,
    /// Confirmed, but must change the temporary password on first login.
    ForceChangePassword,
    Confirmed,
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn admin_create_user(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
        temporary_password: &SecretValue,
    ) -> DirectoryResult<UserStatus>;

    async fn admin_delete_user(&self, pool_id: &str, username: &str) -> DirectoryResult<()>;

    async fn admin_set_user_password(
        &self,
        pool_id: &str,
        username: &str,
        password: &SecretValue,
        permanent: bool,
    ) -> DirectoryResult<()>;

    async fn admin_confirm_sign_up(&self, pool_id: &str, username: &str) -> DirectoryResult<()>;

    async fn admin_update_user_attributes(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
    ) -> DirectoryResult<()>;
}
