//! LLM-backed query planning with a deterministic fallback

use super::models::{QueryPlan, SearchOptions};
use crate::config::dependency;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::resilience::ResilienceExecutor;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Raw planner answer; field aliases cover common model phrasings
#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default, alias = "subQueries", alias = "queries")]
    sub_queries: Vec<String>,
    #[serde(default = "default_true", alias = "useWebSearch", alias = "use_web")]
    use_web_search: bool,
    #[serde(default = "default_true", alias = "runConcurrently", alias = "parallel")]
    run_concurrently: bool,
}

fn default_true() -> bool {
    true
}

/// Decomposes a query into sub-queries via the language model
pub struct QueryPlanner {
    model: Arc<dyn LanguageModel>,
    executor: Arc<ResilienceExecutor>,
    model_id: String,
    max_sub_queries: usize,
}

impl QueryPlanner {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        executor: Arc<ResilienceExecutor>,
        model_id: impl Into<String>,
        max_sub_queries: usize,
    ) -> Self {
        Self {
            model,
            executor,
            model_id: model_id.into(),
            max_sub_queries: max_sub_queries.max(1),
        }
    }

    /// Produce a plan for `query`.
    ///
    /// Any planning failure yields [`QueryPlan::fallback`]; only cancellation
    /// is returned as an error.
    pub async fn plan(
        &self,
        ctx: &RequestContext,
        query: &str,
        _options: &SearchOptions,
    ) -> Result<QueryPlan> {
        let prompt = self.prompt(query);
        let plan = self
            .executor
            .execute_with_fallback(
                dependency::PLANNER,
                ctx,
                || async {
                    let answer = self.model.complete(ctx, &self.model_id, &prompt).await?;
                    self.parse(query, &answer)
                },
                || async {
                    info!("using fallback plan");
                    Ok(QueryPlan::fallback(query))
                },
            )
            .await?;

        debug!(
            sub_queries = plan.sub_queries().len(),
            web = plan.use_secondary_backend(),
            concurrent = plan.run_concurrently(),
            "query planned"
        );
        Ok(plan)
    }

    fn prompt(&self, query: &str) -> String {
        format!(
            "Break the user question into at most {} focused search queries. \
             Decide whether public web search is needed in addition to the internal \
             document index, and whether the queries are independent enough to run \
             in parallel.\n\
             Respond only with JSON: {{\"sub_queries\": [string], \"use_web_search\": bool, \
             \"run_concurrently\": bool}}\n\
             Question: {}",
            self.max_sub_queries, query
        )
    }

    fn parse(&self, query: &str, answer: &str) -> Result<QueryPlan> {
        let body = strip_code_fence(answer);
        let output: PlannerOutput = serde_json::from_str(body).map_err(|e| {
            Error::malformed(dependency::PLANNER, format!("invalid plan JSON: {}", e))
        })?;

        let mut sub_queries: Vec<String> = Vec::new();
        for sub_query in output.sub_queries {
            let sub_query = sub_query.trim().to_string();
            if !sub_query.is_empty() && !sub_queries.contains(&sub_query) {
                sub_queries.push(sub_query);
            }
        }
        sub_queries.truncate(self.max_sub_queries);

        QueryPlan::new(
            query,
            sub_queries,
            output.use_web_search,
            output.run_concurrently,
        )
        .ok_or_else(|| Error::malformed(dependency::PLANNER, "plan has no sub-queries"))
    }
}

fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
