//! Query, options and plan models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options controlling one search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Upper bound on the merged result count, always > 0
    pub max_results: usize,
    /// Relevance floor in [0, 1]
    pub min_relevance_score: f64,
    /// Backend-specific filters, forwarded verbatim
    pub filters: BTreeMap<String, serde_json::Value>,
    pub include_metadata: bool,
    pub enable_caching: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_relevance_score: 0.0,
            filters: BTreeMap::new(),
            include_metadata: true,
            enable_caching: true,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result cap; zero is raised to one
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Set the relevance floor, clamped into [0, 1]
    pub fn with_min_relevance_score(mut self, score: f64) -> Self {
        self.min_relevance_score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = enabled;
        self
    }

    /// Re-apply the value bounds; used for options deserialized from requests
    pub fn normalized(self) -> Self {
        let min = self.min_relevance_score;
        let max = self.max_results;
        self.with_max_results(max).with_min_relevance_score(min)
    }
}

/// User query plus its options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub options: SearchOptions,
}

impl Query {
    pub fn new(text: impl Into<String>, options: SearchOptions) -> Self {
        Self {
            text: text.into(),
            options: options.normalized(),
        }
    }

    pub fn simple(text: impl Into<String>) -> Self {
        Self::new(text, SearchOptions::default())
    }

    /// Whitespace-only queries count as empty
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Where a plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Planner,
    Fallback,
}

/// Decomposition of a query into sub-queries plus dispatch decisions.
///
/// Fields are private so a plan can only be built with at least one sub-query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    original_query: String,
    sub_queries: Vec<String>,
    use_secondary_backend: bool,
    run_concurrently: bool,
    source: PlanSource,
}

impl QueryPlan {
    /// Build a planner-produced plan; `None` when there are no usable sub-queries
    pub fn new(
        original_query: impl Into<String>,
        sub_queries: Vec<String>,
        use_secondary_backend: bool,
        run_concurrently: bool,
    ) -> Option<Self> {
        if sub_queries.is_empty() {
            return None;
        }
        Some(Self {
            original_query: original_query.into(),
            sub_queries,
            use_secondary_backend,
            run_concurrently,
            source: PlanSource::Planner,
        })
    }

    /// Deterministic plan: the query itself, run concurrently, web enabled
    pub fn fallback(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            sub_queries: vec![query.to_string()],
            use_secondary_backend: true,
            run_concurrently: true,
            source: PlanSource::Fallback,
        }
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn sub_queries(&self) -> &[String] {
        &self.sub_queries
    }

    pub fn use_secondary_backend(&self) -> bool {
        self.use_secondary_backend
    }

    pub fn run_concurrently(&self) -> bool {
        self.run_concurrently
    }

    pub fn source(&self) -> PlanSource {
        self.source
    }

    pub fn is_fallback(&self) -> bool {
        self.source == PlanSource::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder_clamps() {
        let options = SearchOptions::new()
            .with_max_results(0)
            .with_min_relevance_score(1.4)
            .with_filter("category", "engine");

        assert_eq!(options.max_results, 1);
        assert_eq!(options.min_relevance_score, 1.0);
        assert_eq!(options.filters.len(), 1);
    }

    #[test]
    fn test_empty_query() {
        assert!(Query::simple("   \t").is_empty());
        assert!(!Query::simple("top speed").is_empty());
    }

    #[test]
    fn test_plan_requires_sub_queries() {
        assert!(QueryPlan::new("q", vec![], true, true).is_none());
        let plan = QueryPlan::new("q", vec!["a".into()], false, false).unwrap();
        assert_eq!(plan.sub_queries(), ["a".to_string()]);
        assert!(!plan.is_fallback());
    }

    #[test]
    fn test_fallback_plan() {
        let plan = QueryPlan::fallback("Honda CBR600RR top speed");
        assert_eq!(plan.sub_queries(), ["Honda CBR600RR top speed".to_string()]);
        assert!(plan.use_secondary_backend());
        assert!(plan.run_concurrently());
        assert_eq!(plan.source(), PlanSource::Fallback);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: SearchOptions = serde_json::from_str(r#"{"max_results": 5}"#).unwrap();
        assert_eq!(options.max_results, 5);
        assert!(options.enable_caching);
    }
}
