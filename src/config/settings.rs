//! Settings structures for the orchestrator

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Dependency names the orchestrator wraps with resilience policies
pub mod dependency {
    pub const PLANNER: &str = "Planner";
    pub const INDEX: &str = "Index";
    pub const WEB_AUGMENTATION: &str = "WebAugmentation";
    pub const EMBEDDING: &str = "Embedding";
    pub const VALIDATION: &str = "Validation";
}

/// Longest duration, in seconds, any setting may express (one day)
pub const MAX_DURATION_SECONDS: f64 = 86_400.0;

/// Seconds from settings as a `Duration`, clamped into `[floor, MAX_DURATION_SECONDS]`.
///
/// NaN maps to `floor`; never panics.
pub fn duration_secs(value: f64, floor: f64) -> Duration {
    let secs = if value.is_nan() {
        floor
    } else {
        value.clamp(floor, MAX_DURATION_SECONDS)
    };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Root settings, loaded from `settings.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub server: ServerSettings,
    pub outgoing: OutgoingSettings,
    pub resilience: ResilienceSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub index: IndexSettings,
    pub llm: LlmSettings,
    pub web_augmentation: WebAugmentationSettings,
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Merge with environment variables (RAG_ORCH_* prefix)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("RAG_ORCH_DEBUG") {
            self.general.debug = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("RAG_ORCH_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("RAG_ORCH_BIND_ADDRESS") {
            self.server.bind_address = val;
        }
        if let Ok(val) = std::env::var("RAG_ORCH_LLM_API_KEY") {
            self.llm.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("RAG_ORCH_INDEX_API_KEY") {
            self.index.api_key = Some(val);
        }
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.search.default_max_results == 0 {
            return Err(Error::Config("search.default_max_results must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.search.default_min_relevance_score) {
            return Err(Error::Config(
                "search.default_min_relevance_score must be within [0, 1]".into(),
            ));
        }
        if self.search.max_sub_queries == 0 {
            return Err(Error::Config("search.max_sub_queries must be > 0".into()));
        }
        let mut durations = vec![
            ("outgoing.request_timeout", self.outgoing.request_timeout),
            (
                "resilience.retry.base_delay_seconds",
                self.resilience.retry.base_delay_seconds,
            ),
            (
                "resilience.retry.max_delay_seconds",
                self.resilience.retry.max_delay_seconds,
            ),
            ("index.timeout_seconds", self.index.timeout_seconds),
            ("llm.timeout_seconds", self.llm.timeout_seconds),
        ];
        for breaker in self.resilience.circuit_breakers.values() {
            durations.push((
                "circuit_breakers.sampling_duration_seconds",
                breaker.sampling_duration_seconds,
            ));
            durations.push((
                "circuit_breakers.break_duration_seconds",
                breaker.break_duration_seconds,
            ));
        }
        for (name, value) in durations {
            if !value.is_finite() || !(0.0..=MAX_DURATION_SECONDS).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be between 0 and {} seconds, got {}",
                    name, MAX_DURATION_SECONDS, value
                )));
            }
        }
        if self.resilience.retry.base_delay_seconds < 0.0
            || self.resilience.retry.max_delay_seconds < self.resilience.retry.base_delay_seconds
        {
            return Err(Error::Config(
                "resilience.retry delays must satisfy 0 <= base <= max".into(),
            ));
        }
        for (name, breaker) in &self.resilience.circuit_breakers {
            if breaker.failure_threshold == 0 {
                return Err(Error::Config(format!(
                    "circuit breaker {} needs failure_threshold > 0",
                    name
                )));
            }
        }
        if self.cache.max_entries == 0 || self.cache.memory_limit_bytes == 0 {
            return Err(Error::Config("cache limits must be > 0".into()));
        }
        let web = &self.web_augmentation;
        if web.max_concurrent_requests == 0 {
            return Err(Error::Config(
                "web_augmentation.max_concurrent_requests must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&web.min_credibility_score) {
            return Err(Error::Config(
                "web_augmentation.min_credibility_score must be within [0, 1]".into(),
            ));
        }
        for source in &web.trusted_sources {
            if !(0.0..=1.0).contains(&source.credibility_score) {
                return Err(Error::Config(format!(
                    "trusted source {} has credibility outside [0, 1]",
                    source.name
                )));
            }
            if !source.search_url_template.contains("{query}") {
                return Err(Error::Config(format!(
                    "trusted source {} search_url_template lacks {{query}}",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Enable debug mode
    pub debug: bool,
    /// Instance name reported on /health
    pub instance_name: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            debug: false,
            instance_name: "rag-orchestrator".to_string(),
        }
    }
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8890,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

/// Outgoing request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingSettings {
    /// Default request timeout in seconds
    pub request_timeout: f64,
    /// Pool max idle connections per host
    pub pool_maxsize: usize,
    /// Verify SSL certificates
    pub verify_ssl: bool,
    /// Proxy for all outgoing requests
    pub proxy: Option<String>,
}

impl Default for OutgoingSettings {
    fn default() -> Self {
        Self {
            request_timeout: 10.0,
            pool_maxsize: 20,
            verify_ssl: true,
            proxy: None,
        }
    }
}

/// Retry configuration shared by every registered dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub use_exponential_backoff: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_seconds: 0.5,
            max_delay_seconds: 10.0,
            use_exponential_backoff: true,
        }
    }
}

/// Circuit breaker configuration for one dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failures within the sampling window that open the circuit
    pub failure_threshold: u32,
    /// Length of the rolling sampling window
    pub sampling_duration_seconds: f64,
    /// Calls within the window required before the circuit may open
    pub minimum_throughput: u32,
    /// Cool-down before a half-open trial is allowed
    pub break_duration_seconds: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            sampling_duration_seconds: 60.0,
            minimum_throughput: 5,
            break_duration_seconds: 30.0,
        }
    }
}

/// Resilience settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    /// Circuit breaker per dependency name; only listed dependencies get a policy
    pub circuit_breakers: BTreeMap<String, CircuitBreakerSettings>,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        let circuit_breakers = [
            dependency::PLANNER,
            dependency::INDEX,
            dependency::WEB_AUGMENTATION,
            dependency::EMBEDDING,
            dependency::VALIDATION,
        ]
        .into_iter()
        .map(|name| (name.to_string(), CircuitBreakerSettings::default()))
        .collect();

        Self {
            retry: RetrySettings::default(),
            circuit_breakers,
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_seconds: u64,
    pub max_entries: u64,
    pub memory_limit_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            max_entries: 10_000,
            memory_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Orchestrator defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_max_results: usize,
    pub default_min_relevance_score: f64,
    /// Upper bound on planner sub-queries
    pub max_sub_queries: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_max_results: 10,
            default_min_relevance_score: 0.0,
            max_sub_queries: 5,
        }
    }
}

/// Index search backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Base URL of the index service
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Run the semantic half of the hybrid search
    pub semantic_search: bool,
    /// Boost recently updated documents
    pub recency_boost: bool,
    pub recency_window_days: u32,
    /// Upper bound for the recency boost factor
    pub max_recency_boost: f64,
    pub timeout_seconds: f64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9200".to_string(),
            api_key: None,
            semantic_search: true,
            recency_boost: true,
            recency_window_days: 30,
            max_recency_boost: 0.1,
            timeout_seconds: 10.0,
        }
    }
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible API base, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    pub api_key: Option<String>,
    pub planner_model: String,
    pub embedding_model: String,
    pub validation_model: String,
    pub timeout_seconds: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/v1".to_string(),
            api_key: None,
            planner_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            validation_model: "gpt-4o-mini".to_string(),
            timeout_seconds: 30.0,
        }
    }
}

/// A web source the augmentation backend is allowed to query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustedSource {
    pub name: String,
    /// URL with a `{query}` placeholder
    pub search_url_template: String,
    /// Static trust weight in [0, 1]
    pub credibility_score: f64,
}

/// Web augmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAugmentationSettings {
    pub enabled: bool,
    pub max_concurrent_requests: usize,
    pub min_request_interval_ms: u64,
    pub min_credibility_score: f64,
    /// Ask the language model to confirm content quality
    pub validate_content: bool,
    /// Score multiplier applied when validation could not run
    pub unvalidated_quality_multiplier: f64,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
    pub max_content_chars: usize,
    /// Terms whose presence raises heuristic relevance
    pub domain_terms: Vec<String>,
    pub trusted_sources: Vec<TrustedSource>,
}

impl Default for WebAugmentationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_requests: 2,
            min_request_interval_ms: 1000,
            min_credibility_score: 0.7,
            validate_content: true,
            unvalidated_quality_multiplier: 0.8,
            cache_ttl_seconds: 3600,
            cache_max_entries: 500,
            max_content_chars: 2000,
            domain_terms: Vec::new(),
            trusted_sources: vec![TrustedSource {
                name: "Wikipedia".to_string(),
                search_url_template:
                    "https://en.wikipedia.org/w/index.php?search={query}&fulltext=1".to_string(),
                credibility_score: 0.85,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8890);
        assert!(!settings.general.debug);
        assert!(settings
            .resilience
            .circuit_breakers
            .contains_key(dependency::INDEX));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_non_finite_durations_are_rejected() {
        let yaml = r#"
resilience:
  retry:
    max_delay_seconds: .inf
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("max_delay_seconds"));

        let mut settings = Settings::default();
        settings.llm.timeout_seconds = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        if let Some(breaker) = settings.resilience.circuit_breakers.get_mut(dependency::INDEX) {
            breaker.break_duration_seconds = f64::INFINITY;
        }
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_duration_secs_never_panics() {
        assert_eq!(duration_secs(f64::INFINITY, 0.0), Duration::from_secs(86_400));
        assert_eq!(duration_secs(f64::NAN, 0.1), Duration::from_secs_f64(0.1));
        assert_eq!(duration_secs(-3.0, 0.0), Duration::ZERO);
        assert_eq!(duration_secs(2.5, 0.0), Duration::from_millis(2500));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
resilience:
  retry:
    max_retries: 1
  circuit_breakers:
    Index:
      failure_threshold: 2
      minimum_throughput: 2
web_augmentation:
  trusted_sources:
    - name: Example
      search_url_template: https://example.com/search?q={query}
      credibility_score: 0.9
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.resilience.retry.max_retries, 1);
        assert_eq!(settings.resilience.retry.base_delay_seconds, 0.5);
        let index = &settings.resilience.circuit_breakers[dependency::INDEX];
        assert_eq!(index.failure_threshold, 2);
        assert_eq!(index.break_duration_seconds, 30.0);
        assert_eq!(settings.resilience.circuit_breakers.len(), 1);
        assert_eq!(settings.web_augmentation.trusted_sources[0].name, "Example");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.web_augmentation.min_credibility_score = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.web_augmentation.trusted_sources[0].search_url_template =
            "https://example.com".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings
            .resilience
            .circuit_breakers
            .insert("Index".to_string(), CircuitBreakerSettings {
                failure_threshold: 0,
                ..Default::default()
            });
        assert!(settings.validate().is_err());
    }
}
