//! Registry of the search capabilities available to the orchestrator

use super::traits::SearchCapability;
use crate::results::BackendKind;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Capabilities keyed by backend kind, resolved once at construction
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<BackendKind, Arc<dyn SearchCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any previous one of the same kind
    pub fn register(mut self, capability: Arc<dyn SearchCapability>) -> Self {
        self.capabilities.insert(capability.kind(), capability);
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn SearchCapability>> {
        self.capabilities.get(&kind)
    }

    /// The capability of `kind` if registered and enabled
    pub fn enabled(&self, kind: BackendKind) -> Option<Arc<dyn SearchCapability>> {
        self.capabilities
            .get(&kind)
            .filter(|capability| capability.is_enabled())
            .cloned()
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.capabilities.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::engines::CapabilityResults;
    use crate::error::Result;
    use crate::search::SearchOptions;
    use async_trait::async_trait;

    struct Stub {
        kind: BackendKind,
        enabled: bool,
    }

    #[async_trait]
    impl SearchCapability for Stub {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn dependency(&self) -> &str {
            "Stub"
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn search(
            &self,
            _ctx: &RequestContext,
            _query: &str,
            _options: &SearchOptions,
        ) -> Result<CapabilityResults> {
            Ok(CapabilityResults::default())
        }
    }

    #[test]
    fn test_registry() {
        let registry = CapabilityRegistry::new()
            .register(Arc::new(Stub {
                kind: BackendKind::Index,
                enabled: true,
            }))
            .register(Arc::new(Stub {
                kind: BackendKind::WebAugmentation,
                enabled: false,
            }));

        assert_eq!(registry.len(), 2);
        assert!(registry.enabled(BackendKind::Index).is_some());
        assert!(registry.get(BackendKind::WebAugmentation).is_some());
        assert!(registry.enabled(BackendKind::WebAugmentation).is_none());
        assert!(!registry.contains(BackendKind::Planner));
    }
}
