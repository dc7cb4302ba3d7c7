//! Application state shared across handlers

use crate::cache::ResultCache;
use crate::config::Settings;
use crate::metrics::Metrics;
use crate::resilience::ResilienceExecutor;
use crate::search::{Orchestrator, SearchOptions};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Global settings
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
    pub executor: Arc<ResilienceExecutor>,
    pub cache: Arc<ResultCache>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        orchestrator: Orchestrator,
        executor: Arc<ResilienceExecutor>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            orchestrator: Arc::new(orchestrator),
            executor,
            cache,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.executor.metrics()
    }

    /// Options a request starts from before its own overrides
    pub fn default_options(&self) -> SearchOptions {
        SearchOptions::new()
            .with_max_results(self.settings.search.default_max_results)
            .with_min_relevance_score(self.settings.search.default_min_relevance_score)
    }
}
