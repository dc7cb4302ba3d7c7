//! Hybrid keyword + semantic index search

use super::traits::{CapabilityResults, SearchCapability};
use crate::config::{dependency, duration_secs, IndexSettings};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::network::{HttpClient, HttpRequest};
use crate::resilience::ResilienceExecutor;
use crate::results::{
    deduplicate, metadata_keys, sort_by_relevance, BackendKind, SearchResult, SearchSource,
};
use crate::search::SearchOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw item returned by the index service
#[derive(Debug, Clone, Deserialize)]
pub struct IndexHit {
    pub id: String,
    pub content: String,
    #[serde(alias = "score", alias = "@search.score", alias = "relevanceScore")]
    pub relevance_score: f64,
    #[serde(default, alias = "documentId")]
    pub document_id: Option<String>,
    #[serde(default, alias = "sourceName")]
    pub source_name: Option<String>,
    #[serde(default, alias = "sourceUrl")]
    pub source_url: String,
    #[serde(default, alias = "lastUpdated")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Remote keyword/vector index
#[async_trait]
pub trait IndexBackend: Send + Sync {
    async fn search(
        &self,
        ctx: &RequestContext,
        text: &str,
        max_results: usize,
        filters: &BTreeMap<String, Value>,
    ) -> Result<Vec<IndexHit>>;

    async fn vector_search(
        &self,
        ctx: &RequestContext,
        vector: &[f32],
        max_results: usize,
        filters: &BTreeMap<String, Value>,
    ) -> Result<Vec<IndexHit>>;
}

/// Index service reached over JSON `POST {endpoint}/search`
pub struct HttpIndexBackend {
    client: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpIndexBackend {
    pub fn new(client: HttpClient, settings: &IndexSettings) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout: duration_secs(settings.timeout_seconds, 0.1),
        }
    }

    async fn post(&self, ctx: &RequestContext, body: Value) -> Result<Vec<IndexHit>> {
        let mut request = HttpRequest::post(format!("{}/search", self.endpoint))
            .timeout(self.timeout)
            .json(body);
        if let Some(ref key) = self.api_key {
            request = request.header("api-key", key.as_str());
        }
        let response = self
            .client
            .execute_ok(ctx, dependency::INDEX, request)
            .await?;
        parse_hits(response.json(dependency::INDEX)?)
    }
}

#[async_trait]
impl IndexBackend for HttpIndexBackend {
    async fn search(
        &self,
        ctx: &RequestContext,
        text: &str,
        max_results: usize,
        filters: &BTreeMap<String, Value>,
    ) -> Result<Vec<IndexHit>> {
        self.post(ctx, json!({ "search": text, "top": max_results, "filters": filters }))
            .await
    }

    async fn vector_search(
        &self,
        ctx: &RequestContext,
        vector: &[f32],
        max_results: usize,
        filters: &BTreeMap<String, Value>,
    ) -> Result<Vec<IndexHit>> {
        self.post(ctx, json!({ "vector": vector, "top": max_results, "filters": filters }))
            .await
    }
}

/// Accepts a bare array or an object wrapping it in `value` or `results`
fn parse_hits(body: Value) -> Result<Vec<IndexHit>> {
    let items = match body {
        Value::Array(_) => body,
        Value::Object(mut map) => map
            .remove("value")
            .or_else(|| map.remove("results"))
            .ok_or_else(|| Error::malformed(dependency::INDEX, "response has no result array"))?,
        _ => return Err(Error::malformed(dependency::INDEX, "unexpected response shape")),
    };
    serde_json::from_value(items)
        .map_err(|e| Error::malformed(dependency::INDEX, format!("invalid hit: {}", e)))
}

/// Technique that produced an index result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Technique {
    Keyword,
    Semantic,
}

impl Technique {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
        }
    }
}

/// Index search capability: keyword search plus, when an embedding is
/// available, a semantic search, merged by document id
pub struct IndexSearch {
    backend: Arc<dyn IndexBackend>,
    model: Option<Arc<dyn LanguageModel>>,
    executor: Arc<ResilienceExecutor>,
    settings: IndexSettings,
    embedding_model: String,
}

impl IndexSearch {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        executor: Arc<ResilienceExecutor>,
        settings: IndexSettings,
    ) -> Self {
        Self {
            backend,
            model: None,
            executor,
            settings,
            embedding_model: String::new(),
        }
    }

    /// Enable the semantic half with `model` producing embeddings
    pub fn with_embeddings(
        mut self,
        model: Arc<dyn LanguageModel>,
        embedding_model: impl Into<String>,
    ) -> Self {
        self.model = Some(model);
        self.embedding_model = embedding_model.into();
        self
    }

    /// Embed the query; `Ok(None)` means semantic search is off or degraded
    async fn embed_query(
        &self,
        ctx: &RequestContext,
        query: &str,
        output: &mut CapabilityResults,
    ) -> Result<Option<Vec<f32>>> {
        let model = match (&self.model, self.settings.semantic_search) {
            (Some(model), true) => model,
            _ => return Ok(None),
        };

        let texts = vec![query.to_string()];
        let embedded = self
            .executor
            .execute(dependency::EMBEDDING, ctx, || {
                model.embed(ctx, &self.embedding_model, &texts)
            })
            .await;

        match embedded {
            Ok(mut vectors) if !vectors.is_empty() => Ok(Some(vectors.swap_remove(0))),
            Ok(_) => {
                warn!("embedding call returned no vectors, using keyword search only");
                output.degradations.push(degradation("embedding returned no vectors"));
                Ok(None)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "embedding failed, using keyword search only");
                output
                    .degradations
                    .push(degradation(format!("embedding failed, keyword only: {}", e)));
                Ok(None)
            }
        }
    }

    fn to_results(&self, hits: Vec<IndexHit>, technique: Technique) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|hit| {
                let document_id = hit.document_id.unwrap_or_else(|| hit.id.clone());
                let source = SearchSource::new(
                    BackendKind::Index,
                    hit.source_name.unwrap_or_else(|| "index".to_string()),
                )
                .with_document_id(document_id)
                .with_url(hit.source_url)
                .with_last_updated(hit.last_updated);
                SearchResult::new(hit.id, hit.content, hit.relevance_score, source)
                    .with_metadata(metadata_keys::TECHNIQUE, technique.as_str())
            })
            .collect()
    }

    /// Multiply recent documents' scores by up to `1 + max_recency_boost`,
    /// decaying linearly to nothing at the end of the window
    fn apply_recency_boost(&self, results: &mut [SearchResult], now: DateTime<Utc>) {
        if !self.settings.recency_boost || self.settings.recency_window_days == 0 {
            return;
        }
        let window_days = f64::from(self.settings.recency_window_days);
        let max_boost = self.settings.max_recency_boost.clamp(0.0, 0.1);

        for result in results.iter_mut() {
            let Some(updated) = result.source.last_updated else {
                continue;
            };
            let age_days = (now - updated).num_seconds().max(0) as f64 / 86_400.0;
            if age_days >= window_days {
                continue;
            }
            let boost = max_boost * (1.0 - age_days / window_days);
            let boosted = result.relevance_score * (1.0 + boost);
            result.set_score(boosted);
            result
                .metadata
                .insert(metadata_keys::RECENCY_BOOST.to_string(), json!(boost));
        }
    }
}

fn degradation(reason: impl Into<String>) -> crate::results::Degradation {
    crate::results::Degradation {
        backend: BackendKind::Index,
        reason: reason.into(),
    }
}

#[async_trait]
impl SearchCapability for IndexSearch {
    fn kind(&self) -> BackendKind {
        BackendKind::Index
    }

    fn dependency(&self) -> &str {
        dependency::INDEX
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        query: &str,
        options: &SearchOptions,
    ) -> Result<CapabilityResults> {
        let mut output = CapabilityResults::default();
        let vector = self.embed_query(ctx, query, &mut output).await?;
        let max = options.max_results;

        let keyword = self.backend.search(ctx, query, max, &options.filters);
        let semantic = async {
            match vector {
                Some(ref vector) => Some(
                    self.backend
                        .vector_search(ctx, vector, max, &options.filters)
                        .await,
                ),
                None => None,
            }
        };
        let (keyword, semantic) = futures::join!(keyword, semantic);

        let mut merged = Vec::new();
        let mut attempted = 0;
        let mut failed = 0;
        let mut last_error = None;
        let halves = [(Technique::Keyword, Some(keyword)), (Technique::Semantic, semantic)];
        for (technique, outcome) in halves {
            let Some(outcome) = outcome else {
                continue;
            };
            attempted += 1;
            match outcome {
                Ok(hits) => merged.extend(self.to_results(hits, technique)),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(technique = technique.as_str(), error = %e, "index search half failed");
                    output.degradations.push(degradation(format!(
                        "{} search failed: {}",
                        technique.as_str(),
                        e
                    )));
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }
        if failed == attempted {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let mut results = deduplicate(merged);
        self.apply_recency_boost(&mut results, Utc::now());
        sort_by_relevance(&mut results);
        results.retain(|r| r.relevance_score >= options.min_relevance_score);
        results.truncate(max);

        debug!(query, count = results.len(), "index search complete");
        output.results = results;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hit(id: &str, doc: &str, score: f64) -> IndexHit {
        IndexHit {
            id: id.to_string(),
            content: format!("content {}", id),
            relevance_score: score,
            document_id: Some(doc.to_string()),
            source_name: None,
            source_url: String::new(),
            last_updated: None,
        }
    }

    enum Canned {
        Hits(Vec<IndexHit>),
        Transient,
        Permanent,
    }

    impl Canned {
        fn produce(&self) -> Result<Vec<IndexHit>> {
            match self {
                Self::Hits(hits) => Ok(hits.clone()),
                Self::Transient => Err(Error::transient(
                    dependency::INDEX,
                    crate::error::TransientKind::Transport,
                    "down",
                )),
                Self::Permanent => Err(Error::malformed(dependency::INDEX, "bad")),
            }
        }
    }

    /// In-memory index returning canned hits and counting calls
    struct FakeIndex {
        keyword: Canned,
        semantic: Canned,
        vector_calls: AtomicU32,
    }

    impl FakeIndex {
        fn new(keyword: Canned, semantic: Canned) -> Self {
            Self {
                keyword,
                semantic,
                vector_calls: AtomicU32::new(0),
            }
        }

        fn with_keyword(hits: Vec<IndexHit>) -> Self {
            Self::new(Canned::Hits(hits), Canned::Hits(Vec::new()))
        }
    }

    #[async_trait]
    impl IndexBackend for FakeIndex {
        async fn search(
            &self,
            _ctx: &RequestContext,
            _text: &str,
            _max_results: usize,
            _filters: &BTreeMap<String, Value>,
        ) -> Result<Vec<IndexHit>> {
            self.keyword.produce()
        }

        async fn vector_search(
            &self,
            _ctx: &RequestContext,
            _vector: &[f32],
            _max_results: usize,
            _filters: &BTreeMap<String, Value>,
        ) -> Result<Vec<IndexHit>> {
            self.vector_calls.fetch_add(1, Ordering::SeqCst);
            self.semantic.produce()
        }
    }

    struct FakeEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for FakeEmbedder {
        async fn complete(&self, _ctx: &RequestContext, _model: &str, _prompt: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn embed(
            &self,
            _ctx: &RequestContext,
            _model: &str,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                Err(Error::transient(
                    dependency::EMBEDDING,
                    crate::error::TransientKind::Timeout,
                    "slow",
                ))
            } else {
                Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect())
            }
        }
    }

    fn executor() -> Arc<ResilienceExecutor> {
        Arc::new(ResilienceExecutor::new(Arc::new(Metrics::new())))
    }

    fn settings() -> IndexSettings {
        IndexSettings {
            recency_boost: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_floor_and_cap() {
        let index = Arc::new(FakeIndex::with_keyword(vec![
            hit("a", "doc-a", 0.9),
            hit("b", "doc-b", 0.7),
            hit("c", "doc-c", 0.3),
        ]));
        let search = IndexSearch::new(index, executor(), settings());
        let options = SearchOptions::new()
            .with_max_results(5)
            .with_min_relevance_score(0.5);

        let output = search
            .search(&RequestContext::new(), "Honda CBR600RR top speed", &options)
            .await
            .unwrap();
        let scores: Vec<_> = output.results.iter().map(|r| r.relevance_score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert_eq!(
            output.results[0].metadata[metadata_keys::TECHNIQUE],
            json!("keyword")
        );
    }

    #[tokio::test]
    async fn test_hybrid_dedup_keeps_higher_score() {
        let index = Arc::new(FakeIndex::new(
            Canned::Hits(vec![hit("k1", "doc-1", 0.6)]),
            Canned::Hits(vec![hit("s1", "doc-1", 0.8)]),
        ));
        let search = IndexSearch::new(index.clone(), executor(), settings())
            .with_embeddings(Arc::new(FakeEmbedder { fail: false }), "emb");

        let output = search
            .search(&RequestContext::new(), "q", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].id, "s1");
        assert_eq!(
            output.results[0].metadata[metadata_keys::TECHNIQUE],
            json!("semantic")
        );
        assert_eq!(index.vector_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_keyword() {
        let index = Arc::new(FakeIndex::with_keyword(vec![hit("k1", "doc-1", 0.6)]));
        let search = IndexSearch::new(index.clone(), executor(), settings())
            .with_embeddings(Arc::new(FakeEmbedder { fail: true }), "emb");

        let output = search
            .search(&RequestContext::new(), "q", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.degradations.len(), 1);
        assert_eq!(index.vector_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_failed_half_is_absorbed() {
        let index = FakeIndex::new(
            Canned::Permanent,
            Canned::Hits(vec![hit("s1", "doc-1", 0.8)]),
        );
        let search = IndexSearch::new(Arc::new(index), executor(), settings())
            .with_embeddings(Arc::new(FakeEmbedder { fail: false }), "emb");

        let output = search
            .search(&RequestContext::new(), "q", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.degradations.len(), 1);
    }

    #[tokio::test]
    async fn test_all_halves_failing_returns_error() {
        let index = FakeIndex::new(Canned::Transient, Canned::Hits(Vec::new()));
        let search = IndexSearch::new(Arc::new(index), executor(), settings());

        let err = search
            .search(&RequestContext::new(), "q", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_recency_boost_is_bounded_and_decays() {
        let search = IndexSearch::new(
            Arc::new(FakeIndex::with_keyword(Vec::new())),
            executor(),
            IndexSettings::default(),
        );
        let now = Utc::now();
        let source = |age_days: i64| {
            SearchSource::new(BackendKind::Index, "docs")
                .with_last_updated(Some(now - chrono::Duration::days(age_days)))
        };
        let mut results = vec![
            SearchResult::new("fresh", "", 0.5, source(0)),
            SearchResult::new("mid", "", 0.5, source(15)),
            SearchResult::new("old", "", 0.5, source(90)),
            SearchResult::new("top", "", 0.95, source(0)),
        ];
        search.apply_recency_boost(&mut results, now);

        assert!((results[0].relevance_score - 0.55).abs() < 1e-9);
        assert!((results[1].relevance_score - 0.525).abs() < 1e-3);
        assert_eq!(results[2].relevance_score, 0.5);
        assert_eq!(results[3].relevance_score, 1.0);
    }

    #[tokio::test]
    async fn test_http_backend_parses_wrapped_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("api-key", "k"))
            .and(body_partial_json(json!({ "search": "top speed", "top": 3 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "id": "1", "content": "c", "@search.score": 0.7, "source_url": "http://x" }
                ]
            })))
            .mount(&server)
            .await;

        let backend = HttpIndexBackend::new(
            HttpClient::new().unwrap(),
            &IndexSettings {
                endpoint: server.uri(),
                api_key: Some("k".to_string()),
                ..Default::default()
            },
        );
        let hits = backend
            .search(&RequestContext::new(), "top speed", 3, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relevance_score, 0.7);
    }

    #[test]
    fn test_parse_hits_rejects_unknown_shape() {
        assert!(parse_hits(json!("nope")).is_err());
        assert!(parse_hits(json!({ "other": [] })).is_err());
        assert_eq!(parse_hits(json!([])).unwrap().len(), 0);
    }

    #[test]
    fn test_parse_hits_accepts_camel_case_fields() {
        let hits = parse_hits(json!({
            "value": [{
                "id": "1",
                "content": "CBR600RR top speed",
                "relevanceScore": 0.82,
                "documentId": "doc-1",
                "sourceName": "Manual",
                "sourceUrl": "https://example.com/manual",
                "lastUpdated": "2024-03-01T00:00:00Z"
            }]
        }))
        .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relevance_score, 0.82);
        assert_eq!(hits[0].document_id.as_deref(), Some("doc-1"));
        assert_eq!(hits[0].source_name.as_deref(), Some("Manual"));
        assert_eq!(hits[0].source_url, "https://example.com/manual");
        assert!(hits[0].last_updated.is_some());
    }
}
