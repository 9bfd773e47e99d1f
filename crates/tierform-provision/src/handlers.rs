//! Routing of resource kinds to handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tierform_core::{ResourceHandler, ResourceKind};

/// One default handler plus per-kind overrides.
///
/// The managed-service backend handles most kinds; the reconciled user is
/// routed to the identity reconciler.
#[derive(Clone)]
pub struct HandlerSet {
    default: Arc<dyn ResourceHandler>,
    overrides: BTreeMap<ResourceKind, Arc<dyn ResourceHandler>>,
}

impl HandlerSet {
    pub fn new(default: Arc<dyn ResourceHandler>) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with(mut self, kind: ResourceKind, handler: Arc<dyn ResourceHandler>) -> Self {
        self.overrides.insert(kind, handler);
        self
    }

    pub fn for_kind(&self, kind: ResourceKind) -> Arc<dyn ResourceHandler> {
        self.overrides
            .get(&kind)
            .unwrap_or(&self.default)
            .clone()
    }
}
