//! Certificate binding for the HTTPS listener.
//!
//! The listener terminates TLS with a pre-issued certificate identified by
//! reference. A certificate covers one or more server names; SNI picks the
//! certificate, and the default certificate answers when SNI is absent or
//! matches nothing.

use std::collections::BTreeMap;

use tracing::debug;

/// A pre-issued certificate, by reference. Key material stays with the
/// certificate manager and never enters this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundCertificate {
    pub reference: String,
    /// Server names (`api.example.com`, `*.example.com`) the certificate covers.
    pub server_names: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CertificateBinding {
    /// Keyed by server name pattern.
    certs: BTreeMap<String, BoundCertificate>,
    default_reference: Option<String>,
}

impl CertificateBinding {
    /// A binding with a single default certificate, as the stack declares it.
    pub fn with_default(reference: impl Into<String>) -> Self {
        let mut binding = Self::default();
        binding.bind(
            BoundCertificate {
                reference: reference.into(),
                server_names: Vec::new(),
            },
            true,
        );
        binding
    }

    pub fn bind(&mut self, cert: BoundCertificate, is_default: bool) {
        debug!(reference = %cert.reference, names = ?cert.server_names, "certificate bound");
        if is_default {
            self.default_reference = Some(cert.reference.clone());
        }
        for name in &cert.server_names {
            self.certs.insert(name.to_ascii_lowercase(), cert.clone());
        }
        if cert.server_names.is_empty() {
            self.certs.insert(cert.reference.clone(), cert);
        }
    }

    pub fn unbind(&mut self, reference: &str) {
        self.certs.retain(|_, c| c.reference != reference);
        if self.default_reference.as_deref() == Some(reference) {
            self.default_reference = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// The certificate to present for `server_name`.
    pub fn resolve(&self, server_name: Option<&str>) -> Option<&BoundCertificate> {
        if let Some(name) = server_name.map(str::to_ascii_lowercase) {
            if let Some(cert) = self.certs.get(&name) {
                return Some(cert);
            }

            // *.example.com matches api.example.com but not a.b.example.com.
            for (pattern, cert) in &self.certs {
                if let Some(suffix) = pattern.strip_prefix("*.")
                    && let Some(label) = name.strip_suffix(suffix).and_then(|n| n.strip_suffix('.'))
                    && !label.is_empty()
                    && !label.contains('.')
                {
                    return Some(cert);
                }
            }
        }

        let default = self.default_reference.as_deref()?;
        self.certs.values().find(|c| c.reference == default)
    }
}
