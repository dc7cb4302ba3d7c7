//! Search capability traits

use crate::context::RequestContext;
use crate::error::Result;
use crate::results::{BackendKind, Degradation, SearchResult};
use crate::search::SearchOptions;
use async_trait::async_trait;

/// Output of one capability call
#[derive(Debug, Clone, Default)]
pub struct CapabilityResults {
    pub results: Vec<SearchResult>,
    /// Sub-steps that failed without failing the call
    pub degradations: Vec<Degradation>,
}

impl CapabilityResults {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            degradations: Vec::new(),
        }
    }
}

/// A retrieval backend the orchestrator can dispatch sub-queries to.
///
/// Implementations rank, deduplicate and filter their own results, and absorb
/// failures of individual sources. An error is returned only when nothing
/// could be attempted successfully.
#[async_trait]
pub trait SearchCapability: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Resilience dependency name the orchestrator wraps calls in
    fn dependency(&self) -> &str;

    /// Whether the capability is configured to run at all
    fn is_enabled(&self) -> bool {
        true
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        query: &str,
        options: &SearchOptions,
    ) -> Result<CapabilityResults>;
}
