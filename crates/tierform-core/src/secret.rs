//! Generated secret values and the narrow read path to them.
//!
//! Secret values never appear in logs or debug output: [`SecretValue`]
//! redacts itself and only a short sha256 fingerprint may be printed.

use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::handler::HandlerResult;

/// A secret value held in memory. Zeroed on drop.
#[derive(Clone)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the plaintext. Callers must not log or persist it.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// First 12 hex chars of the sha256 digest, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(digest)[..12].to_string()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

/// The only components allowed to read generated secret values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretConsumer {
    /// Binding secrets into the compute task environment at launch.
    TaskEnvironment,
    /// The identity reconciler reading the bootstrap user's temporary password.
    IdentityReconciler,
}

/// Read-only access to the credential store.
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn read_secret(&self, secret_id: &str, consumer: SecretConsumer) -> HandlerResult<SecretValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let secret = SecretValue::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretValue(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = SecretValue::new("hunter2");
        let b = SecretValue::new("hunter2");
        assert_eq!(a.fingerprint().len(), 12);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(!a.fingerprint().contains("hunter2"));
    }
}
