//! UserReconciler: idempotent create/delete of one directory user.
//!
//! The lifecycle is persisted as a `UserRecord` so a repeated or resumed
//! call knows what already happened:
//!
//! ```text
//! ABSENT ──create──► CREATING ──created / already exists──► PRESENT
//!    ▲                   │                                    │
//!    │                   └──────────────delete────────────────┤
//!    │                                                        ▼
//!    └────────────deleted / not found───────────────────── DELETING
//! ```
//!
//! `AlreadyExists` on create and `NotFound` on delete are absorbed as
//! success. Any other directory error leaves the record where it was, so
//! the next call resumes from the same state.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use tierform_core::SecretValue;
use tierform_state::{StateError, StateStore, UserLifecycle, UserRecord, epoch_secs};

use crate::capability::ScopedDirectory;
use crate::directory::{DirectoryError, IdentityDirectory, UserStatus};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("cannot move user {username} from {from:?} to {to:?}")]
    InvalidTransition {
        username: String,
        from: UserLifecycle,
        to: UserLifecycle,
    },
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// What a reconcile call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The directory created the user.
    Created,
    /// The directory already had the user; nothing was created.
    Adopted,
    /// The user was already present with the requested attributes.
    AlreadyPresent,
    /// Present user's attributes were changed.
    AttributesUpdated,
    Deleted,
    /// The user did not exist; delete is a no-op.
    AlreadyAbsent,
}

/// Arguments of a create call.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub pool_id: String,
    pub username: String,
    pub attributes: BTreeMap<String, String>,
    pub temporary_password: SecretValue,
    /// Promote the temporary password to permanent after creation.
    pub permanent_password: bool,
}

/// Legal lifecycle moves. Re-entering `Creating` or `Deleting` resumes an
/// interrupted call.
fn can_transition(from: UserLifecycle, to: UserLifecycle) -> bool {
    use UserLifecycle::*;
    matches!(
        (from, to),
        (Absent, Creating)
            | (Creating, Creating)
            | (Creating, Present)
            | (Present, Present)
            | (Creating, Deleting)
            | (Present, Deleting)
            | (Deleting, Deleting)
            | (Deleting, Absent)
    )
}

pub struct UserReconciler {
    directory: ScopedDirectory,
    state: StateStore,
}

impl UserReconciler {
    pub fn new(directory: ScopedDirectory, state: StateStore) -> Self {
        Self { directory, state }
    }

    /// Current lifecycle of a user as recorded. No record means `Absent`.
    pub fn lifecycle(&self, pool_id: &str, username: &str) -> ReconcileResult<UserLifecycle> {
        Ok(self
            .state
            .get_user(pool_id, username)?
            .map(|r| r.lifecycle)
            .unwrap_or(UserLifecycle::Absent))
    }

    fn transition(
        &self,
        pool_id: &str,
        username: &str,
        to: UserLifecycle,
        attributes: &BTreeMap<String, String>,
    ) -> ReconcileResult<()> {
        let from = self.lifecycle(pool_id, username)?;
        if !can_transition(from, to) {
            return Err(ReconcileError::InvalidTransition {
                username: username.to_string(),
                from,
                to,
            });
        }
        if to == UserLifecycle::Absent {
            self.state.delete_user(pool_id, username)?;
        } else {
            self.state.put_user(&UserRecord {
                pool_id: pool_id.to_string(),
                username: username.to_string(),
                lifecycle: to,
                attributes: attributes.clone(),
                updated_at: epoch_secs(),
            })?;
        }
        debug!(pool_id, username, ?from, ?to, "user lifecycle transition");
        Ok(())
    }

    /// Create the user, at most once.
    ///
    /// A present user with identical attributes is left alone; changed
    /// attributes are written with update-attributes only.
    pub async fn create(&self, request: &CreateUser) -> ReconcileResult<ReconcileOutcome> {
        let (pool_id, username) = (request.pool_id.as_str(), request.username.as_str());
        let existing = self.state.get_user(pool_id, username)?;

        if let Some(record) = &existing {
            match record.lifecycle {
                UserLifecycle::Present if record.attributes == request.attributes => {
                    debug!(pool_id, username, "user already present");
                    return Ok(ReconcileOutcome::AlreadyPresent);
                }
                UserLifecycle::Present => {
                    return self.update_attributes(pool_id, username, &request.attributes).await;
                }
                _ => {}
            }
        }

        let resuming = existing
            .as_ref()
            .is_some_and(|r| r.lifecycle == UserLifecycle::Creating);
        self.transition(pool_id, username, UserLifecycle::Creating, &request.attributes)?;

        let created = self
            .directory
            .admin_create_user(pool_id, username, &request.attributes, &request.temporary_password)
            .await;

        let outcome = match created {
            Ok(status) => {
                self.finish_signup(request, status).await?;
                ReconcileOutcome::Created
            }
            Err(DirectoryError::AlreadyExists(_)) => {
                info!(pool_id, username, "user already exists in directory, adopting");
                if resuming {
                    // An earlier attempt created the user but stopped before
                    // finishing sign-up.
                    self.finish_signup(request, UserStatus::Unconfirmed).await?;
                }
                ReconcileOutcome::Adopted
            }
            Err(e) => return Err(e.into()),
        };

        self.transition(pool_id, username, UserLifecycle::Present, &request.attributes)?;
        info!(
            pool_id,
            username,
            ?outcome,
            password = %request.temporary_password.fingerprint(),
            "user reconciled"
        );
        Ok(outcome)
    }

    async fn finish_signup(&self, request: &CreateUser, status: UserStatus) -> ReconcileResult<()> {
        if status == UserStatus::Unconfirmed {
            self.directory
                .admin_confirm_sign_up(&request.pool_id, &request.username)
                .await?;
        }
        if request.permanent_password {
            self.directory
                .admin_set_user_password(
                    &request.pool_id,
                    &request.username,
                    &request.temporary_password,
                    true,
                )
                .await?;
        }
        Ok(())
    }

    /// Overwrite the attributes of a present user.
    pub async fn update_attributes(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ReconcileResult<ReconcileOutcome> {
        let from = self.lifecycle(pool_id, username)?;
        if from != UserLifecycle::Present {
            return Err(ReconcileError::InvalidTransition {
                username: username.to_string(),
                from,
                to: UserLifecycle::Present,
            });
        }
        self.directory
            .admin_update_user_attributes(pool_id, username, attributes)
            .await?;
        self.transition(pool_id, username, UserLifecycle::Present, attributes)?;
        info!(pool_id, username, "user attributes updated");
        Ok(ReconcileOutcome::AttributesUpdated)
    }

    /// Delete the user. Deleting a user that does not exist succeeds.
    pub async fn delete(&self, pool_id: &str, username: &str) -> ReconcileResult<ReconcileOutcome> {
        let existing = self.state.get_user(pool_id, username)?;
        let attributes = existing
            .as_ref()
            .map(|r| r.attributes.clone())
            .unwrap_or_default();
        if existing.is_some() {
            self.transition(pool_id, username, UserLifecycle::Deleting, &attributes)?;
        }

        let outcome = match self.directory.admin_delete_user(pool_id, username).await {
            Ok(()) => ReconcileOutcome::Deleted,
            Err(DirectoryError::NotFound(what)) => {
                warn!(pool_id, username, %what, "user not found on delete, treating as deleted");
                ReconcileOutcome::AlreadyAbsent
            }
            Err(e) => return Err(e.into()),
        };

        if existing.is_some() {
            self.transition(pool_id, username, UserLifecycle::Absent, &attributes)?;
        }
        info!(pool_id, username, ?outcome, "user removed");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::AdminCapability;
    use crate::testing::InMemoryDirectory;
    use std::sync::Arc;

    const POOL: &str = "pool-1";

    fn setup(directory: InMemoryDirectory) -> (Arc<InMemoryDirectory>, UserReconciler) {
        let directory = Arc::new(directory);
        let scoped = ScopedDirectory::new(directory.clone(), AdminCapability::for_user_reconciler(POOL));
        let state = StateStore::open_in_memory().unwrap();
        (directory, UserReconciler::new(scoped, state))
    }

    fn request(permanent: bool) -> CreateUser {
        CreateUser {
            pool_id: POOL.to_string(),
            username: "admin".to_string(),
            attributes: BTreeMap::from([
                ("email".to_string(), "admin@example.com".to_string()),
                ("email_verified".to_string(), "true".to_string()),
            ]),
            temporary_password: SecretValue::new("Temp#Pass1234"),
            permanent_password: permanent,
        }
    }

    #[test]
    fn transition_table() {
        use UserLifecycle::*;
        assert!(can_transition(Absent, Creating));
        assert!(can_transition(Creating, Present));
        assert!(can_transition(Present, Deleting));
        assert!(can_transition(Deleting, Absent));
        assert!(!can_transition(Absent, Present));
        assert!(!can_transition(Deleting, Creating));
        assert!(!can_transition(Present, Creating));
    }

    #[tokio::test]
    async fn create_twice_takes_effect_once() {
        let (directory, reconciler) = setup(InMemoryDirectory::default().with_pool(POOL));

        assert_eq!(reconciler.create(&request(false)).await.unwrap(), ReconcileOutcome::Created);
        assert_eq!(
            reconciler.create(&request(false)).await.unwrap(),
            ReconcileOutcome::AlreadyPresent
        );

        assert_eq!(directory.calls(), vec!["create pool-1/admin"]);
        assert_eq!(reconciler.lifecycle(POOL, "admin").unwrap(), UserLifecycle::Present);
    }

    #[tokio::test]
    async fn already_exists_is_absorbed() {
        let directory = InMemoryDirectory::default().with_pool(POOL);
        directory.insert_user(POOL, "admin");
        let (directory, reconciler) = setup(directory);

        let outcome = reconciler.create(&request(true)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Adopted);
        // Not resuming, so an existing user's password is left alone.
        assert_eq!(directory.calls(), vec!["create pool-1/admin"]);
        assert_eq!(reconciler.lifecycle(POOL, "admin").unwrap(), UserLifecycle::Present);
    }

    #[tokio::test]
    async fn unconfirmed_user_is_confirmed_and_password_made_permanent() {
        let (directory, reconciler) = setup(
            InMemoryDirectory::default()
                .with_pool(POOL)
                .starting_as(UserStatus::Unconfirmed),
        );

        reconciler.create(&request(true)).await.unwrap();

        assert_eq!(
            directory.calls(),
            vec![
                "create pool-1/admin",
                "confirm pool-1/admin",
                "set-password pool-1/admin"
            ]
        );
        let user = directory.user(POOL, "admin").unwrap();
        assert!(user.permanent_password);
        assert_eq!(user.status, UserStatus::Confirmed);
    }

    #[tokio::test]
    async fn changed_attributes_issue_update_only() {
        let (directory, reconciler) = setup(InMemoryDirectory::default().with_pool(POOL));
        reconciler.create(&request(false)).await.unwrap();

        let mut changed = request(false);
        changed
            .attributes
            .insert("email".to_string(), "ops@example.com".to_string());
        let outcome = reconciler.create(&changed).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::AttributesUpdated);
        assert_eq!(
            directory.calls(),
            vec!["create pool-1/admin", "update-attributes pool-1/admin"]
        );
        assert_eq!(
            directory.user(POOL, "admin").unwrap().attributes["email"],
            "ops@example.com"
        );
    }

    #[tokio::test]
    async fn delete_missing_user_succeeds() {
        let (_directory, reconciler) = setup(InMemoryDirectory::default().with_pool(POOL));
        let outcome = reconciler.delete(POOL, "nobody").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn delete_removes_record_and_is_repeatable() {
        let (directory, reconciler) = setup(InMemoryDirectory::default().with_pool(POOL));
        reconciler.create(&request(false)).await.unwrap();

        assert_eq!(reconciler.delete(POOL, "admin").await.unwrap(), ReconcileOutcome::Deleted);
        assert_eq!(reconciler.lifecycle(POOL, "admin").unwrap(), UserLifecycle::Absent);
        assert!(directory.user(POOL, "admin").is_none());

        assert_eq!(
            reconciler.delete(POOL, "admin").await.unwrap(),
            ReconcileOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn failed_create_leaves_creating_and_resumes() {
        // The pool is missing on the first attempt.
        let (_directory, reconciler) = setup(InMemoryDirectory::default());
        let err = reconciler.create(&request(false)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Directory(DirectoryError::NotFound(_))));
        assert_eq!(reconciler.lifecycle(POOL, "admin").unwrap(), UserLifecycle::Creating);

        // Same store, directory where the pool now exists and the user was
        // created by the interrupted attempt.
        let directory = Arc::new(InMemoryDirectory::default().with_pool(POOL));
        directory.insert_user(POOL, "admin");
        let resumed = UserReconciler::new(
            ScopedDirectory::new(directory.clone(), AdminCapability::for_user_reconciler(POOL)),
            reconciler.state.clone(),
        );
        let outcome = resumed.create(&request(true)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Adopted);
        assert!(directory.calls().contains(&"set-password pool-1/admin".to_string()));
        assert_eq!(resumed.lifecycle(POOL, "admin").unwrap(), UserLifecycle::Present);
    }

    #[tokio::test]
    async fn create_outside_capability_is_refused() {
        let (directory, reconciler) = setup(InMemoryDirectory::default().with_pool("pool-2"));
        let mut other = request(false);
        other.pool_id = "pool-2".to_string();

        let err = reconciler.create(&other).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Directory(DirectoryError::AccessDenied(_))));
        assert!(directory.calls().is_empty());
    }
}
