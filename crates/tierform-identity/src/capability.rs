//! Least-privilege capability for the reconciler.
//!
//! The reconciler may call five admin actions, on exactly one pool. Any
//! other call is refused locally with `AccessDenied` before it reaches the
//! directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use tierform_core::SecretValue;

use crate::directory::{DirectoryError, DirectoryResult, IdentityDirectory, UserStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AdminAction {
    CreateUser,
    DeleteUser,
    SetUserPassword,
    ConfirmSignUp,
    UpdateUserAttributes,
}

impl AdminAction {
    /// Action name as it appears in a policy statement.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::CreateUser => "identity:AdminCreateUser",
            AdminAction::DeleteUser => "identity:AdminDeleteUser",
            AdminAction::SetUserPassword => "identity:AdminSetUserPassword",
            AdminAction::ConfirmSignUp => "identity:AdminConfirmSignUp",
            AdminAction::UpdateUserAttributes => "identity:AdminUpdateUserAttributes",
        }
    }
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of admin actions granted on a single pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCapability {
    pool_id: String,
    actions: BTreeSet<AdminAction>,
}

impl AdminCapability {
    /// Exactly the actions the user reconciler needs.
    pub fn for_user_reconciler(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            actions: BTreeSet::from([
                AdminAction::CreateUser,
                AdminAction::DeleteUser,
                AdminAction::SetUserPassword,
                AdminAction::ConfirmSignUp,
                AdminAction::UpdateUserAttributes,
            ]),
        }
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn actions(&self) -> impl Iterator<Item = AdminAction> + '_ {
        self.actions.iter().copied()
    }

    pub fn permits(&self, action: AdminAction, pool_id: &str) -> bool {
        pool_id == self.pool_id && self.actions.contains(&action)
    }

    fn check(&self, action: AdminAction, pool_id: &str) -> DirectoryResult<()> {
        if self.permits(action, pool_id) {
            return Ok(());
        }
        warn!(%action, pool_id, granted_pool = %self.pool_id, "admin call outside capability refused");
        Err(DirectoryError::AccessDenied(format!("{action} on pool {pool_id}")))
    }

    /// The capability as a policy statement: allowed actions on one pool.
    pub fn policy_document(&self) -> serde_json::Value {
        let actions: Vec<&str> = self.actions.iter().map(AdminAction::as_str).collect();
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": actions,
                "Resource": format!("userpool/{}", self.pool_id),
            }]
        })
    }
}

/// An `IdentityDirectory` that only forwards calls its capability permits.
#[derive(Clone)]
pub struct ScopedDirectory {
    inner: Arc<dyn IdentityDirectory>,
    capability: AdminCapability,
}

impl ScopedDirectory {
    pub fn new(inner: Arc<dyn IdentityDirectory>, capability: AdminCapability) -> Self {
        Self { inner, capability }
    }

    pub fn capability(&self) -> &AdminCapability {
        &self.capability
    }
}

#[async_trait]
impl IdentityDirectory for ScopedDirectory {
    async fn admin_create_user(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
        temporary_password: &SecretValue,
    ) -> DirectoryResult<UserStatus> {
        self.capability.check(AdminAction::CreateUser, pool_id)?;
        self.inner
            .admin_create_user(pool_id, username, attributes, temporary_password)
            .await
    }

    async fn admin_delete_user(&self, pool_id: &str, username: &str) -> DirectoryResult<()> {
        self.capability.check(AdminAction::DeleteUser, pool_id)?;
        self.inner.admin_delete_user(pool_id, username).await
    }

    async fn admin_set_user_password(
        &self,
        pool_id: &str,
        username: &str,
        password: &SecretValue,
        permanent: bool,
    ) -> DirectoryResult<()> {
        self.capability.check(AdminAction::SetUserPassword, pool_id)?;
        self.inner
            .admin_set_user_password(pool_id, username, password, permanent)
            .await
    }

    async fn admin_confirm_sign_up(&self, pool_id: &str, username: &str) -> DirectoryResult<()> {
        self.capability.check(AdminAction::ConfirmSignUp, pool_id)?;
        self.inner.admin_confirm_sign_up(pool_id, username).await
    }

    async fn admin_update_user_attributes(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
    ) -> DirectoryResult<()> {
        self.capability.check(AdminAction::UpdateUserAttributes, pool_id)?;
        self.inner
            .admin_update_user_attributes(pool_id, username, attributes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryDirectory;

    #[test]
    fn reconciler_capability_has_exactly_five_actions() {
        let capability = AdminCapability::for_user_reconciler("pool-1");
        assert_eq!(capability.actions().count(), 5);
        assert!(capability.permits(AdminAction::CreateUser, "pool-1"));
        assert!(!capability.permits(AdminAction::CreateUser, "pool-2"));
    }

    #[test]
    fn policy_document_names_one_pool() {
        let doc = AdminCapability::for_user_reconciler("pool-1").policy_document();
        let statement = &doc["Statement"][0];
        assert_eq!(statement["Effect"], "Allow");
        assert_eq!(statement["Resource"], "userpool/pool-1");
        assert_eq!(statement["Action"].as_array().unwrap().len(), 5);
        assert!(
            statement["Action"]
                .as_array()
                .unwrap()
                .contains(&json!("identity:AdminConfirmSignUp"))
        );
    }

    #[tokio::test]
    async fn calls_on_other_pools_never_reach_directory() {
        let directory = Arc::new(InMemoryDirectory::default().with_pool("pool-1").with_pool("pool-2"));
        let scoped = ScopedDirectory::new(
            directory.clone(),
            AdminCapability::for_user_reconciler("pool-1"),
        );

        let err = scoped.admin_delete_user("pool-2", "admin").await.unwrap_err();
        assert!(matches!(err, DirectoryError::AccessDenied(_)));
        assert!(directory.calls().is_empty());

        let status = scoped
            .admin_create_user("pool-1", "admin", &BTreeMap::new(), &SecretValue::new("Temp#1234"))
            .await
            .unwrap();
        assert_eq!(status, UserStatus::ForceChangePassword);
        assert_eq!(directory.calls(), vec!["create pool-1/admin"]);
    }
}
