//! Query orchestration: plan, dispatch, merge

use super::models::{Query, QueryPlan, SearchOptions};
use super::planner::QueryPlanner;
use crate::cache::{generate_key, ResultCache};
use crate::context::RequestContext;
use crate::engines::{CapabilityRegistry, CapabilityResults, SearchCapability};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::results::{
    metadata_keys, BackendFailure, BackendKind, Degradation, DispatchTiming, ResultContainer,
    SearchResult,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Overall outcome of a search request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// Every dispatch succeeded
    Ok,
    /// Results were found but some dispatches failed
    Partial,
    /// Backends answered but nothing cleared the relevance floor
    NoResults,
    /// Every dispatch failed and nothing was cached
    AllBackendsFailed,
    /// The query was empty; nothing was dispatched
    EmptyQuery,
}

impl SearchStatus {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Ok => "all backends answered",
            Self::Partial => "some backends failed; results may be incomplete",
            Self::NoResults => "no results matched the query",
            Self::AllBackendsFailed => "all backends failed and no cached results were available",
            Self::EmptyQuery => "empty query",
        }
    }
}

/// Full answer to a search request
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub correlation_id: String,
    pub query: String,
    pub plan: Option<QueryPlan>,
    pub results: Vec<SearchResult>,
    pub status: SearchStatus,
    pub description: String,
    pub degradations: Vec<Degradation>,
    pub failures: Vec<BackendFailure>,
    pub timings: Vec<DispatchTiming>,
    pub elapsed_ms: u64,
}

/// How one (sub-query, backend) dispatch was served
enum Served {
    Fresh(CapabilityResults),
    Cached(Vec<SearchResult>),
    Empty,
}

/// Top-level coordinator.
///
/// Capabilities are resolved once here; dispatch never inspects types at runtime.
pub struct Orchestrator {
    planner: QueryPlanner,
    index: Arc<dyn SearchCapability>,
    web: Option<Arc<dyn SearchCapability>>,
    executor: Arc<crate::resilience::ResilienceExecutor>,
    cache: Arc<ResultCache>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    /// Fails when no index capability is registered
    pub fn new(
        planner: QueryPlanner,
        registry: &CapabilityRegistry,
        executor: Arc<crate::resilience::ResilienceExecutor>,
        cache: Arc<ResultCache>,
    ) -> Result<Self> {
        let index = registry
            .get(BackendKind::Index)
            .cloned()
            .ok_or_else(|| Error::Config("no index search capability registered".into()))?;
        let web = registry.enabled(BackendKind::WebAugmentation);
        if web.is_none() {
            info!("web augmentation unavailable, index search only");
        }
        let metrics = executor.metrics().clone();

        Ok(Self {
            planner,
            index,
            web,
            executor,
            cache,
            metrics,
        })
    }

    pub fn web_available(&self) -> bool {
        self.web.is_some()
    }

    /// Plan `query` without dispatching it
    pub async fn plan(
        &self,
        ctx: &RequestContext,
        query: &str,
        options: &SearchOptions,
    ) -> Result<QueryPlan> {
        ctx.bind(self.planner.plan(ctx, query, options)).await
    }

    /// Merged, ranked results for `query`
    pub async fn search(
        &self,
        ctx: &RequestContext,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let query = Query::new(query, options.clone());
        Ok(self.execute(ctx, &query).await?.results)
    }

    /// Run `query` end to end.
    ///
    /// Backend failures are reported in the response, never as errors; the
    /// only error is cancellation.
    pub async fn execute(&self, ctx: &RequestContext, query: &Query) -> Result<SearchResponse> {
        ctx.bind(self.execute_inner(ctx, query)).await
    }

    async fn execute_inner(&self, ctx: &RequestContext, query: &Query) -> Result<SearchResponse> {
        let started = Instant::now();
        self.metrics.inc_search();

        if query.is_empty() {
            debug!("empty query, nothing to dispatch");
            return Ok(self.respond(ctx, query, None, &ResultContainer::new(), 0, started));
        }

        let options = &query.options;
        let plan = self.planner.plan(ctx, &query.text, options).await?;

        let mut dispatches: Vec<(&Arc<dyn SearchCapability>, &str)> = Vec::new();
        for sub_query in plan.sub_queries() {
            dispatches.push((&self.index, sub_query.as_str()));
            if plan.use_secondary_backend() {
                if let Some(ref web) = self.web {
                    dispatches.push((web, sub_query.as_str()));
                }
            }
        }

        info!(
            query = %query.text,
            sub_queries = plan.sub_queries().len(),
            dispatches = dispatches.len(),
            concurrent = plan.run_concurrently(),
            "dispatching search"
        );

        let container = ResultContainer::new();
        if plan.run_concurrently() {
            let outcomes = ctx
                .guard(async {
                    Ok(join_all(dispatches.iter().map(|(capability, sub_query)| {
                        self.dispatch(ctx, capability, sub_query, options, &container)
                    }))
                    .await)
                })
                .await?;
            outcomes.into_iter().collect::<Result<Vec<()>>>()?;
        } else {
            for (capability, sub_query) in &dispatches {
                self.dispatch(ctx, capability, sub_query, options, &container)
                    .await?;
            }
        }

        let dispatched = dispatches.len();
        drop(dispatches);
        let response = self.respond(ctx, query, Some(plan), &container, dispatched, started);
        info!(
            status = ?response.status,
            results = response.results.len(),
            elapsed_ms = response.elapsed_ms,
            "search complete"
        );
        Ok(response)
    }

    /// One (sub-query, backend) call: cache first, then the backend under its
    /// resilience policy, with the cache as fallback. Only cancellation is an error.
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        capability: &Arc<dyn SearchCapability>,
        sub_query: &str,
        options: &SearchOptions,
        container: &ResultContainer,
    ) -> Result<()> {
        let kind = capability.kind();
        let scope = ctx.logging_scope([("backend", kind.as_str()), ("sub_query", sub_query)]);
        let started = Instant::now();
        let key = options
            .enable_caching
            .then(|| generate_key(sub_query, options, kind));

        if let Some(ref key) = key {
            if let Some(cached) = self.cache.get(key).await {
                scope.in_scope(|| debug!(count = cached.len(), "served from cache"));
                self.collect(container, kind, sub_query, cached, started, true);
                return Ok(());
            }
        }

        let last_error: Mutex<Option<String>> = Mutex::new(None);
        let served = scope
            .bind(self.executor.execute_with_fallback(
                capability.dependency(),
                ctx,
                || async {
                    let outcome = capability.search(ctx, sub_query, options).await;
                    if let Err(ref e) = outcome {
                        *last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(e.to_string());
                    }
                    outcome.map(Served::Fresh)
                },
                || async {
                    let cached = match key {
                        Some(ref key) => self.cache.get(key).await,
                        None => None,
                    };
                    Ok(cached.map_or(Served::Empty, Served::Cached))
                },
            ))
            .await;

        let error = || {
            last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .unwrap_or_else(|| format!("circuit for {} is open", capability.dependency()))
        };

        match served {
            Ok(Served::Fresh(output)) => {
                if let Some(key) = key.filter(|_| output.degradations.is_empty()) {
                    self.cache.set(key, output.results.clone(), None).await;
                }
                for degradation in output.degradations {
                    container.add_degradation(degradation);
                }
                self.collect(container, kind, sub_query, output.results, started, false);
            }
            Ok(Served::Cached(results)) => {
                let reason = error();
                scope.in_scope(|| warn!(error = %reason, "backend failed, serving stale cache"));
                container.add_degradation(Degradation {
                    backend: kind,
                    reason: format!("served cached results: {}", reason),
                });
                self.collect(container, kind, sub_query, results, started, true);
            }
            Ok(Served::Empty) => {
                let reason = error();
                scope.in_scope(|| warn!(error = %reason, "backend failed, no fallback data"));
                container.add_failure(BackendFailure {
                    backend: kind,
                    sub_query: sub_query.to_string(),
                    error: reason,
                });
                container.add_timing(timing(kind, sub_query, started, 0, false));
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                container.add_failure(BackendFailure {
                    backend: kind,
                    sub_query: sub_query.to_string(),
                    error: e.to_string(),
                });
                container.add_timing(timing(kind, sub_query, started, 0, false));
            }
        }
        Ok(())
    }

    fn collect(
        &self,
        container: &ResultContainer,
        kind: BackendKind,
        sub_query: &str,
        results: Vec<SearchResult>,
        started: Instant,
        cached: bool,
    ) {
        let count = results.len();
        container.extend_results(
            results
                .into_iter()
                .map(|r| r.with_metadata(metadata_keys::SUB_QUERY, sub_query)),
        );
        container.add_timing(timing(kind, sub_query, started, count, cached));
    }

    fn respond(
        &self,
        ctx: &RequestContext,
        query: &Query,
        plan: Option<QueryPlan>,
        container: &ResultContainer,
        dispatched: usize,
        started: Instant,
    ) -> SearchResponse {
        let options = &query.options;
        let mut results = container.top_results(options.min_relevance_score, options.max_results);
        if !options.include_metadata {
            for result in &mut results {
                result.metadata.clear();
            }
        }

        let failures = container.failures();
        let status = if plan.is_none() {
            SearchStatus::EmptyQuery
        } else if !results.is_empty() {
            if failures.is_empty() {
                SearchStatus::Ok
            } else {
                SearchStatus::Partial
            }
        } else if dispatched > 0 && failures.len() >= dispatched {
            SearchStatus::AllBackendsFailed
        } else {
            SearchStatus::NoResults
        };

        SearchResponse {
            correlation_id: ctx.correlation_id().to_string(),
            query: query.text.clone(),
            plan,
            results,
            status,
            description: status.describe().to_string(),
            degradations: container.degradations(),
            failures,
            timings: container.timings(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn timing(
    backend: BackendKind,
    sub_query: &str,
    started: Instant,
    result_count: usize,
    cached: bool,
) -> DispatchTiming {
    DispatchTiming {
        backend,
        sub_query: sub_query.to_string(),
        time_ms: started.elapsed().as_millis() as u64,
        result_count,
        cached,
    }
}
