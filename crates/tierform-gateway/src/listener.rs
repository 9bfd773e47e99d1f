//! The HTTPS listener: what happens to one request.
//!
//! Evaluation order:
//!
//! 1. TLS. Plaintext is redirected to HTTPS; a server name with no bound
//!    certificate is refused.
//! 2. Availability. With zero healthy targets every request is answered
//!    `503 Service Unavailable`.
//! 3. Authentication. The callback path completes a login; any other
//!    request without a valid session is redirected to the hosted login.
//! 4. Forwarding, round robin over the healthy targets.
//!
//! Unauthenticated requests never reach a target.

use std::sync::Arc;

use http::{Request, StatusCode, header};
use tracing::{debug, warn};

use tierform_core::ResolvedResource;
use tierform_core::topology::CALLBACK_PATH;
use tierform_health::{Target, TargetGroup};

use crate::auth::{AuthenticateAction, SessionCheck, SessionStore, session_cookie, set_cookie};
use crate::balancer::RoundRobin;
use crate::error::{ListenerError, ListenerResult};
use crate::tls::CertificateBinding;

/// What the TLS layer learned about the connection.
#[derive(Debug, Clone, Default)]
pub struct TlsInfo {
    /// SNI server name, if the client sent one.
    pub server_name: Option<String>,
}

/// The listener's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Forward {
        target: Target,
        subject: String,
    },
    Redirect {
        status: StatusCode,
        location: String,
        set_cookie: Option<String>,
    },
    Reject {
        status: StatusCode,
        reason: String,
    },
    /// No healthy target.
    Unavailable,
}

impl Decision {
    pub fn status(&self) -> StatusCode {
        match self {
            Decision::Forward { .. } => StatusCode::OK,
            Decision::Redirect { status, .. } | Decision::Reject { status, .. } => *status,
            Decision::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Decision::Forward { target, .. } => Some(target),
            _ => None,
        }
    }
}

pub struct Listener {
    port: u16,
    tls: CertificateBinding,
    auth: AuthenticateAction,
    targets: Arc<TargetGroup>,
    sessions: Arc<dyn SessionStore>,
    balancer: RoundRobin,
}

impl Listener {
    pub fn new(
        port: u16,
        tls: CertificateBinding,
        auth: AuthenticateAction,
        targets: Arc<TargetGroup>,
        sessions: Arc<dyn SessionStore>,
    ) -> ListenerResult<Self> {
        if tls.is_empty() {
            return Err(ListenerError::NoCertificate);
        }
        Ok(Self {
            port,
            tls,
            auth,
            targets,
            sessions,
            balancer: RoundRobin::new(),
        })
    }

    /// Build from the resolved `listener` descriptor.
    pub fn from_resource(
        listener: &ResolvedResource,
        targets: Arc<TargetGroup>,
        sessions: Arc<dyn SessionStore>,
    ) -> ListenerResult<Self> {
        let port_value = listener
            .get("port")
            .ok_or_else(|| ListenerError::MissingProperty("port".to_string()))?;
        let port = port_value.parse().map_err(|_| ListenerError::InvalidProperty {
            key: "port".to_string(),
            value: port_value.to_string(),
        })?;
        let certificate = listener
            .get("certificate")
            .filter(|c| !c.trim().is_empty())
            .ok_or(ListenerError::NoCertificate)?;

        Self::new(
            port,
            CertificateBinding::with_default(certificate),
            AuthenticateAction::from_resource(listener)?,
            targets,
            sessions,
        )
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handle<B>(&self, request: &Request<B>, tls: Option<&TlsInfo>, now: u64) -> Decision {
        let Some(host) = host_of(request) else {
            return reject(StatusCode::BAD_REQUEST, "missing host");
        };
        let original = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let Some(tls) = tls else {
            return Decision::Redirect {
                status: StatusCode::MOVED_PERMANENTLY,
                location: format!("https://{host}{original}"),
                set_cookie: None,
            };
        };
        if self.tls.resolve(tls.server_name.as_deref()).is_none() {
            return reject(StatusCode::MISDIRECTED_REQUEST, "no certificate for server name");
        }

        let healthy = self.targets.healthy_targets();
        if healthy.is_empty() {
            warn!(group = %self.targets.name(), "no healthy targets");
            return Decision::Unavailable;
        }

        if request.uri().path() == CALLBACK_PATH {
            return self.complete_login(request.uri().query().unwrap_or(""), now);
        }

        let check = request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(session_cookie)
            .map_or(SessionCheck::Missing, |id| self.sessions.validate(id, now));
        let subject = match check {
            SessionCheck::Valid { subject } => subject,
            other => {
                debug!(?other, path = %request.uri().path(), "redirecting to hosted login");
                return Decision::Redirect {
                    status: StatusCode::FOUND,
                    location: self.auth.authorize_url(&host, original),
                    set_cookie: None,
                };
            }
        };

        match self.balancer.pick(&healthy) {
            Some(target) => {
                debug!(target = %target.id, %subject, "forwarding");
                Decision::Forward {
                    target: target.clone(),
                    subject,
                }
            }
            None => Decision::Unavailable,
        }
    }

    /// Exchange the authorization code and send the client back to where
    /// it started.
    fn complete_login(&self, query: &str, now: u64) -> Decision {
        let Some(code) = query_param(query, "code") else {
            return reject(StatusCode::BAD_REQUEST, "callback without code");
        };
        let Some(session) = self.sessions.establish(&code, now, self.auth.session_timeout) else {
            warn!("authorization code rejected");
            return reject(StatusCode::UNAUTHORIZED, "invalid authorization code");
        };

        // Only same-origin paths; anything else lands on the root.
        let location = query_param(query, "state")
            .filter(|s| is_local_path(s))
            .unwrap_or_else(|| "/".to_string());
        Decision::Redirect {
            status: StatusCode::FOUND,
            location,
            set_cookie: Some(set_cookie(&session, self.auth.session_timeout)),
        }
    }
}

fn reject(status: StatusCode, reason: &str) -> Decision {
    Decision::Reject {
        status,
        reason: reason.to_string(),
    }
}

/// A path on this origin. Browsers read `\` as `/`, so `/\host` is as
/// off-site as `//host`.
fn is_local_path(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(|c| c.is_ascii_control() || c.is_whitespace())
}

fn host_of<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .and_then(|(_, v)| urlencoding::decode(v).ok())
        .map(|v| v.into_owned())
}
