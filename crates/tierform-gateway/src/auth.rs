//! The listener's authentication action.
//!
//! Every request must carry a valid session cookie. Without one the client
//! is redirected to the identity pool's hosted login; the login redirects
//! back to the callback path with an authorization code, which is exchanged
//! for a session before the original request is replayed.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use tierform_core::ResolvedResource;
use tierform_core::config::parse_duration;
use tierform_core::topology::CALLBACK_PATH;

use crate::error::{ListenerError, ListenerResult};

pub const SESSION_COOKIE: &str = "TierformAuthSession";

/// Authentication settings attached to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateAction {
    pub user_pool_arn: String,
    pub client_id: String,
    /// Hosted login domain, without scheme.
    pub domain: String,
    pub scope: String,
    pub session_timeout: Duration,
}

impl AuthenticateAction {
    /// Read the `auth.*` properties of a resolved listener descriptor.
    pub fn from_resource(listener: &ResolvedResource) -> ListenerResult<Self> {
        let get = |key: &str| {
            listener
                .get(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ListenerError::MissingProperty(key.to_string()))
        };
        let timeout = get("auth.session_timeout")?;
        let session_timeout = parse_duration(&timeout).ok_or_else(|| ListenerError::InvalidProperty {
            key: "auth.session_timeout".to_string(),
            value: timeout.clone(),
        })?;

        Ok(Self {
            user_pool_arn: get("auth.user_pool_arn")?,
            client_id: get("auth.client_id")?,
            domain: get("auth.domain")?,
            scope: get("auth.scope")?,
            session_timeout,
        })
    }

    /// Hosted login URL for a client that asked for `host` + `original`.
    pub fn authorize_url(&self, host: &str, original: &str) -> String {
        let redirect_uri = format!("https://{host}{CALLBACK_PATH}");
        format!(
            "https://{}/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.domain,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&self.scope),
            urlencoding::encode(original),
        )
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub subject: String,
    pub expires_at: u64,
}

/// Result of checking a request's session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    Valid { subject: String },
    Missing,
    Expired,
    Invalid,
}

/// Session issue and lookup on behalf of the listener.
pub trait SessionStore: Send + Sync {
    /// Exchange an authorization code for a session lasting `timeout`.
    /// `None` if the code is unknown or already used.
    fn establish(&self, code: &str, now: u64, timeout: Duration) -> Option<Session>;

    fn validate(&self, session_id: &str, now: u64) -> SessionCheck;
}

/// In-memory sessions plus the authorization codes the identity pool has
/// handed out.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Session>>,
    /// code → subject; each code is single use.
    codes: RwLock<HashMap<String, String>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a code issued by the hosted login for `subject`.
    pub fn grant_code(&self, code: impl Into<String>, subject: impl Into<String>) {
        self.codes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.into(), subject.into());
    }

    /// Sessions held, expired ones included until they are purged.
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }
}

impl SessionStore for SessionTable {
    fn establish(&self, code: &str, now: u64, timeout: Duration) -> Option<Session> {
        let subject = self
            .codes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(code)?;
        let id = format!("{:032x}", rand::random::<u128>());
        let session = Session {
            id: id.clone(),
            subject,
            expires_at: now.saturating_add(timeout.as_secs()),
        };
        info!(subject = %session.subject, expires_at = session.expires_at, "session established");
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        if sessions.len() < before {
            debug!(purged = before - sessions.len(), "expired sessions purged");
        }
        sessions.insert(id, session.clone());
        Some(session)
    }

    fn validate(&self, session_id: &str, now: u64) -> SessionCheck {
        let expired = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            match sessions.get(session_id) {
                None => return SessionCheck::Invalid,
                Some(s) if s.expires_at <= now => s.subject.clone(),
                Some(s) => {
                    return SessionCheck::Valid {
                        subject: s.subject.clone(),
                    };
                }
            }
        };
        debug!(subject = %expired, "session expired");
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        SessionCheck::Expired
    }
}

/// Extract the session cookie from a `Cookie` header value.
pub fn session_cookie(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value for a new session.
pub fn set_cookie(session: &Session, timeout: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={}; Path=/; Max-Age={}; Secure; HttpOnly; SameSite=Lax",
        session.id,
        timeout.as_secs()
    )
}
