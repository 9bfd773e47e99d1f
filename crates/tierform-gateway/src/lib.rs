//! tierform-gateway: the authenticated HTTPS entry point.
//!
//! Models the listener's per-request decision: TLS with a bound
//! certificate, authentication against the identity pool, and forwarding to
//! the healthy targets of a target group. Target health itself comes from
//! `tierform-health`.
//!
//! # Components
//!
//! - **`tls`**: certificate binding with SNI and wildcard resolution
//! - **`auth`**: authentication action, hosted login redirect, sessions
//! - **`balancer`**: round-robin selection over healthy targets
//! - **`listener`**: the request pipeline producing a [`Decision`]

pub mod auth;
pub mod balancer;
pub mod error;
pub mod listener;
pub mod tls;

pub use auth::{AuthenticateAction, SESSION_COOKIE, Session, SessionCheck, SessionStore, SessionTable};
pub use balancer::RoundRobin;
pub use error::{ListenerError, ListenerResult};
pub use listener::{Decision, Listener, TlsInfo};
pub use tls::{BoundCertificate, CertificateBinding};
