//! Web augmentation search over a fixed list of trusted sources

use super::extract::{extract_text, highlights, query_terms};
use super::traits::{CapabilityResults, SearchCapability};
use crate::cache::normalize_query;
use crate::config::{dependency, TrustedSource, WebAugmentationSettings};
use crate::context::RequestContext;
use crate::error::{Error, PermanentKind, Result, TransientKind};
use crate::llm::LanguageModel;
use crate::network::{HttpClient, HttpRequest};
use crate::resilience::ResilienceExecutor;
use crate::results::{
    deduplicate, metadata_keys, sort_by_relevance, BackendKind, Degradation, SearchResult,
    SearchSource,
};
use crate::search::SearchOptions;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const KEYWORD_WEIGHT: f64 = 0.7;
const DOMAIN_WEIGHT: f64 = 0.3;
/// Domain-term matches needed for the full domain component
const DOMAIN_SATURATION: f64 = 3.0;
const MAX_HIGHLIGHTS: usize = 3;

/// Outcome of asking the language model about content quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validation {
    Valid,
    Invalid,
    Unchecked,
}

/// Public-web augmentation capability.
///
/// All requests share one rate limiter and one concurrency gate, so the
/// minimum interval holds across every concurrent caller.
pub struct WebAugmentation {
    client: HttpClient,
    settings: WebAugmentationSettings,
    executor: Arc<ResilienceExecutor>,
    model: Option<Arc<dyn LanguageModel>>,
    validation_model: String,
    limiter: Option<DirectLimiter>,
    gate: Semaphore,
    cache: Cache<String, Arc<Vec<SearchResult>>>,
}

impl WebAugmentation {
    pub fn new(
        client: HttpClient,
        settings: WebAugmentationSettings,
        executor: Arc<ResilienceExecutor>,
    ) -> Self {
        let limiter = Quota::with_period(Duration::from_millis(settings.min_request_interval_ms))
            .map(RateLimiter::direct);
        let gate = Semaphore::new(settings.max_concurrent_requests.max(1));
        let cache = Cache::builder()
            .max_capacity(settings.cache_max_entries)
            .time_to_live(Duration::from_secs(settings.cache_ttl_seconds))
            .build();

        Self {
            client,
            settings,
            executor,
            model: None,
            validation_model: String::new(),
            limiter,
            gate,
            cache,
        }
    }

    /// Validate extracted content with `model` before admitting it
    pub fn with_validation(
        mut self,
        model: Arc<dyn LanguageModel>,
        validation_model: impl Into<String>,
    ) -> Self {
        self.model = Some(model);
        self.validation_model = validation_model.into();
        self
    }

    /// Sources whose credibility clears the configured floor
    fn credible_sources(&self) -> Vec<&TrustedSource> {
        self.settings
            .trusted_sources
            .iter()
            .filter(|source| {
                let credible = source.credibility_score >= self.settings.min_credibility_score;
                if !credible {
                    debug!(
                        source = %source.name,
                        credibility = source.credibility_score,
                        "source below credibility floor, skipping"
                    );
                }
                credible
            })
            .collect()
    }

    /// Wait for a concurrency slot and the rate limiter; dropping the permit frees the slot
    async fn admit(&self, ctx: &RequestContext) -> Result<tokio::sync::SemaphorePermit<'_>> {
        ctx.guard(async {
            let permit = self.gate.acquire().await.map_err(|_| {
                Error::transient(
                    dependency::WEB_AUGMENTATION,
                    TransientKind::Transport,
                    "request gate closed",
                )
            })?;
            if let Some(ref limiter) = self.limiter {
                limiter.until_ready().await;
            }
            Ok(permit)
        })
        .await
    }

    async fn fetch_source(
        &self,
        ctx: &RequestContext,
        source: &TrustedSource,
        query: &str,
        terms: &[String],
    ) -> Result<Option<SearchResult>> {
        let filled = source
            .search_url_template
            .replace("{query}", &urlencoding::encode(query));
        let url = Url::parse(&filled).map_err(|e| {
            Error::permanent(
                dependency::WEB_AUGMENTATION,
                PermanentKind::BadRequest,
                format!("invalid search url for {}: {}", source.name, e),
            )
        })?;

        let response = {
            let _permit = self.admit(ctx).await?;
            self.client
                .execute_ok(
                    ctx,
                    dependency::WEB_AUGMENTATION,
                    HttpRequest::get(url.as_str()).html(),
                )
                .await?
        };

        let text = extract_text(&response.text, self.settings.max_content_chars);
        if text.is_empty() {
            debug!(source = %source.name, "no content extracted");
            return Ok(None);
        }

        let mut score = self.relevance(&text, terms);
        let validation = self.validate(ctx, query, &text).await?;
        match validation {
            Validation::Invalid => {
                info!(source = %source.name, "content rejected by validation");
                return Ok(None);
            }
            Validation::Unchecked => score *= self.settings.unvalidated_quality_multiplier,
            Validation::Valid => {}
        }

        let highlights = highlights(&text, terms, MAX_HIGHLIGHTS);
        let content = format!(
            "{}\n\nSource: {} ({})",
            text, source.name, response.url
        );
        let id = format!("web:{}", fingerprint(&response.url));
        let result = SearchResult::new(
            id,
            content,
            score,
            SearchSource::new(BackendKind::WebAugmentation, source.name.as_str())
                .with_document_id(response.url.as_str())
                .with_url(response.url.as_str())
                .with_last_updated(Some(Utc::now())),
        )
        .with_metadata(metadata_keys::CREDIBILITY, source.credibility_score)
        .with_metadata(
            metadata_keys::QUALITY_VALIDATED,
            validation == Validation::Valid,
        )
        .with_highlights(highlights);

        Ok(Some(result))
    }

    /// Keyword overlap blended with domain-term presence
    fn relevance(&self, text: &str, terms: &[String]) -> f64 {
        let lower = text.to_lowercase();
        let overlap = if terms.is_empty() {
            0.0
        } else {
            terms.iter().filter(|t| lower.contains(t.as_str())).count() as f64 / terms.len() as f64
        };

        if self.settings.domain_terms.is_empty() {
            return overlap;
        }
        let domain_hits = self
            .settings
            .domain_terms
            .iter()
            .filter(|t| lower.contains(&t.to_lowercase()))
            .count() as f64;
        KEYWORD_WEIGHT * overlap + DOMAIN_WEIGHT * (domain_hits / DOMAIN_SATURATION).min(1.0)
    }

    /// Ask the model whether `text` is useful for `query`.
    ///
    /// Any failure other than cancellation admits the content as unchecked.
    async fn validate(&self, ctx: &RequestContext, query: &str, text: &str) -> Result<Validation> {
        let model = match (&self.model, self.settings.validate_content) {
            (Some(model), true) => model,
            _ => return Ok(Validation::Unchecked),
        };

        let prompt = format!(
            "Decide whether the following web content is accurate, relevant and useful \
             for answering the question.\nQuestion: {}\nContent: {}\n\
             Answer with a JSON object {{\"valid\": true|false}}.",
            query, text
        );
        let answer = self
            .executor
            .execute(dependency::VALIDATION, ctx, || {
                model.complete(ctx, &self.validation_model, &prompt)
            })
            .await;

        match answer {
            Ok(answer) => match parse_validation(&answer) {
                Some(true) => Ok(Validation::Valid),
                Some(false) => Ok(Validation::Invalid),
                None => {
                    warn!("unreadable validation answer, admitting content unvalidated");
                    Ok(Validation::Unchecked)
                }
            },
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "content validation failed, admitting content unvalidated");
                Ok(Validation::Unchecked)
            }
        }
    }
}

fn parse_validation(answer: &str) -> Option<bool> {
    let trimmed = answer
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return value
            .get("valid")
            .or_else(|| value.get("is_valid"))
            .and_then(|v| v.as_bool());
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("yes") || lower.starts_with("valid") || lower.starts_with("true") {
        Some(true)
    } else if lower.starts_with("no") || lower.starts_with("invalid") || lower.starts_with("false")
    {
        Some(false)
    } else {
        None
    }
}

fn fingerprint(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Apply the request's floor and cap to a cached or fresh result set
fn select(results: &[SearchResult], options: &SearchOptions) -> Vec<SearchResult> {
    results
        .iter()
        .filter(|r| r.relevance_score >= options.min_relevance_score)
        .take(options.max_results)
        .cloned()
        .collect()
}

#[async_trait]
impl SearchCapability for WebAugmentation {
    fn kind(&self) -> BackendKind {
        BackendKind::WebAugmentation
    }

    fn dependency(&self) -> &str {
        dependency::WEB_AUGMENTATION
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        query: &str,
        options: &SearchOptions,
    ) -> Result<CapabilityResults> {
        let cache_key = normalize_query(query);
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(query, "web augmentation cache hit");
            return Ok(CapabilityResults::new(select(&cached, options)));
        }

        let sources = self.credible_sources();
        if sources.is_empty() {
            debug!("no credible web sources configured");
            return Ok(CapabilityResults::default());
        }

        let terms = query_terms(query);
        let outcomes = join_all(
            sources
                .iter()
                .map(|source| self.fetch_source(ctx, source, query, &terms)),
        )
        .await;

        let mut output = CapabilityResults::default();
        let mut collected = Vec::new();
        let mut last_error = None;
        let mut failed = 0;
        for (source, outcome) in sources.iter().zip(outcomes) {
            match outcome {
                Ok(Some(result)) => collected.push(result),
                Ok(None) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(source = %source.name, error = %e, "web source failed");
                    output.degradations.push(Degradation {
                        backend: BackendKind::WebAugmentation,
                        reason: format!("{} failed: {}", source.name, e),
                    });
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }
        if failed == sources.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let mut results = deduplicate(collected);
        sort_by_relevance(&mut results);
        if failed == 0 {
            self.cache.insert(cache_key, Arc::new(results.clone())).await;
        }

        output.results = select(&results, options);
        Ok(output)
    }
}
