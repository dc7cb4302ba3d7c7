//! HTTP request handlers

use super::state::AppState;
use crate::context::RequestContext;
use crate::error::Error;
use crate::resilience::CircuitState;
use crate::search::{Query as SearchQuery, SearchOptions};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::error;

/// Header carrying the request's correlation id, in and out
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Search parameters, from the query string or a JSON body
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    /// Search query
    #[serde(default, alias = "query")]
    pub q: String,
    pub max_results: Option<usize>,
    pub min_relevance_score: Option<f64>,
    pub include_metadata: Option<bool>,
    pub enable_caching: Option<bool>,
    /// Backend filters; JSON bodies only
    #[serde(default)]
    pub filters: BTreeMap<String, serde_json::Value>,
}

impl SearchParams {
    /// Apply these parameters on top of `defaults`
    pub fn options(&self, defaults: SearchOptions) -> SearchOptions {
        let mut options = defaults;
        if let Some(max_results) = self.max_results {
            options = options.with_max_results(max_results);
        }
        if let Some(score) = self.min_relevance_score {
            options = options.with_min_relevance_score(score);
        }
        if let Some(include) = self.include_metadata {
            options = options.with_metadata(include);
        }
        if let Some(enabled) = self.enable_caching {
            options = options.with_caching(enabled);
        }
        for (key, value) in &self.filters {
            options = options.with_filter(key.clone(), value.clone());
        }
        options
    }
}

/// `GET /search`
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    run_search(&state, &headers, params).await
}

/// `POST /search`
pub async fn search_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<SearchParams>,
) -> Response {
    run_search(&state, &headers, params).await
}

async fn run_search(state: &AppState, headers: &HeaderMap, params: SearchParams) -> Response {
    let ctx = RequestContext::get_or_create(
        headers
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let query = SearchQuery::new(params.q.clone(), params.options(state.default_options()));
    let id = ctx.correlation_id().to_string();

    match state.orchestrator.execute(&ctx, &query).await {
        Ok(response) => with_correlation(&id, Json(response)),
        Err(e) => {
            let status = match e {
                Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            ctx.span().in_scope(|| error!(error = %e, "search failed"));
            with_correlation(
                &id,
                (
                    status,
                    Json(json!({ "correlation_id": id, "error": e.to_string() })),
                ),
            )
        }
    }
}

fn with_correlation(id: &str, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    if let Ok(value) = HeaderValue::from_str(id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// Health check handler; `degraded` while any circuit is not closed
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let circuits = state.executor.health_status();
    let healthy = circuits.values().all(|s| *s == CircuitState::Closed);
    Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "version": crate::VERSION,
        "web_augmentation": state.orchestrator.web_available(),
        "circuits": circuits,
    }))
}

/// Stats handler
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "total_searches": state.metrics().total_searches(),
        "dependencies": state.metrics().snapshot(),
        "cache": state.cache.statistics().await,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateParams {
    pub pattern: Option<String>,
}

/// `DELETE /cache?pattern=`; no pattern clears everything
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> impl IntoResponse {
    let pattern = params.pattern.unwrap_or_else(|| "*".to_string());
    state.cache.invalidate(&pattern);
    Json(json!({ "invalidated": pattern }))
}
