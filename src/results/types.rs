//! Result type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known metadata keys attached by the backends
pub mod metadata_keys {
    /// `"keyword"` or `"semantic"` for index results
    pub const TECHNIQUE: &str = "search_technique";
    /// Static trust weight of the web source
    pub const CREDIBILITY: &str = "credibility_score";
    /// Whether the language model confirmed content quality
    pub const QUALITY_VALIDATED: &str = "quality_validated";
    /// Recency boost factor applied to the score
    pub const RECENCY_BOOST: &str = "recency_boost";
    /// Sub-query that produced the result
    pub const SUB_QUERY: &str = "sub_query";
}

/// Which backend produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    Index,
    WebAugmentation,
    Planner,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::WebAugmentation => "web_augmentation",
            Self::Planner => "planner",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSource {
    pub backend_kind: BackendKind,
    pub source_name: String,
    /// Identity used for deduplication; empty when unknown
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub source_url: String,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SearchSource {
    pub fn new(backend_kind: BackendKind, source_name: impl Into<String>) -> Self {
        Self {
            backend_kind,
            source_name: source_name.into(),
            document_id: String::new(),
            source_url: String::new(),
            last_updated: None,
        }
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = document_id.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn with_last_updated(mut self, last_updated: Option<DateTime<Utc>>) -> Self {
        self.last_updated = last_updated;
        self
    }
}

/// A single search result. Read-only once produced by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    /// Relevance in [0, 1]
    pub relevance_score: f64,
    pub source: SearchSource,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl SearchResult {
    /// Create a result; the score is clamped into [0, 1]
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        relevance_score: f64,
        source: SearchSource,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            relevance_score: clamp_score(relevance_score),
            source,
            metadata: BTreeMap::new(),
            generated_at: Utc::now(),
            highlights: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_highlights(mut self, highlights: Vec<String>) -> Self {
        self.highlights = highlights;
        self
    }

    /// Replace the score, keeping it within [0, 1]
    pub fn set_score(&mut self, score: f64) {
        self.relevance_score = clamp_score(score);
    }

    /// Key under which two results count as duplicates
    pub fn dedup_key(&self) -> &str {
        if self.source.document_id.is_empty() {
            &self.id
        } else {
            &self.source.document_id
        }
    }

    /// Credibility of the originating web source, if any
    pub fn credibility(&self) -> Option<f64> {
        self.metadata
            .get(metadata_keys::CREDIBILITY)
            .and_then(|v| v.as_f64())
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// A backend call that produced no results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend: BackendKind,
    pub sub_query: String,
    pub error: String,
}

/// Soft failure: the call succeeded with reduced quality
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Degradation {
    pub backend: BackendKind,
    pub reason: String,
}

/// Timing for one (sub-query, backend) dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTiming {
    pub backend: BackendKind,
    pub sub_query: String,
    pub time_ms: u64,
    pub result_count: usize,
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_clamped() {
        let source = SearchSource::new(BackendKind::Index, "docs");
        assert_eq!(SearchResult::new("a", "", 1.7, source.clone()).relevance_score, 1.0);
        assert_eq!(SearchResult::new("b", "", -0.2, source.clone()).relevance_score, 0.0);
        assert_eq!(SearchResult::new("c", "", f64::NAN, source).relevance_score, 0.0);
    }

    #[test]
    fn test_dedup_key_prefers_document_id() {
        let with_doc = SearchResult::new(
            "chunk-1",
            "",
            0.5,
            SearchSource::new(BackendKind::Index, "docs").with_document_id("doc-9"),
        );
        let without_doc =
            SearchResult::new("chunk-2", "", 0.5, SearchSource::new(BackendKind::Index, "docs"));

        assert_eq!(with_doc.dedup_key(), "doc-9");
        assert_eq!(without_doc.dedup_key(), "chunk-2");
    }

    #[test]
    fn test_backend_kind_serializes_by_name() {
        let json = serde_json::to_string(&BackendKind::WebAugmentation).unwrap();
        assert_eq!(json, "\"WebAugmentation\"");
    }
}
