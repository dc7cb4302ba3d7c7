//! Result cache
//!
//! Maps a fingerprint of (query, options, backend) to a previously computed
//! result set. Expiry is per entry and rechecked on every read; capacity is
//! bounded by weighted size so large result sets are evicted first.

mod key;

pub use key::{generate_key, normalize_query};

use crate::config::CacheSettings;
use crate::results::SearchResult;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One cached result set
#[derive(Debug)]
pub struct CacheEntry {
    pub key: String,
    results: Vec<SearchResult>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    ttl: Duration,
    access_count: AtomicU64,
    last_accessed_ms: AtomicI64,
    pub size_bytes: u64,
}

impl CacheEntry {
    fn new(key: String, results: Vec<SearchResult>, ttl: Duration) -> Self {
        let now = Utc::now();
        let size_bytes = estimate_size(&key, &results);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            results,
            created_at: now,
            expires_at,
            ttl,
            access_count: AtomicU64::new(0),
            last_accessed_ms: AtomicI64::new(now.timestamp_millis()),
            size_bytes,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn last_accessed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.last_accessed_ms.load(Ordering::Relaxed))
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }
}

fn estimate_size(key: &str, results: &[SearchResult]) -> u64 {
    let body = serde_json::to_vec(results)
        .map(|bytes| bytes.len())
        .unwrap_or_else(|_| results.iter().map(|r| r.content.len() + 256).sum());
    (key.len() + body) as u64
}

/// Expire each entry after its own TTL
struct PerEntryTtl;

impl Expiry<String, Arc<CacheEntry>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub current_entries: u64,
    pub memory_usage_bytes: u64,
    pub avg_response_time_ms: f64,
}

/// Shared result cache. Failures inside the cache never surface as errors;
/// they degrade to a miss.
pub struct ResultCache {
    entries: Cache<String, Arc<CacheEntry>>,
    default_ttl: Duration,
    memory_bytes: Arc<AtomicU64>,
    hits: AtomicU64,
    misses: AtomicU64,
    lookup_micros: AtomicU64,
}

impl ResultCache {
    /// Create a cache bounded by `max_entries` and `memory_limit_bytes`
    pub fn new(default_ttl: Duration, max_entries: u64, memory_limit_bytes: u64) -> Self {
        let memory_limit = memory_limit_bytes.max(1);
        // Every entry weighs at least its share of the budget, which bounds the count too.
        let min_weight = (memory_limit / max_entries.max(1)).max(1);
        let memory_bytes = Arc::new(AtomicU64::new(0));
        let evicted_bytes = memory_bytes.clone();

        let entries = Cache::builder()
            .max_capacity(memory_limit)
            .weigher(move |_key: &String, value: &Arc<CacheEntry>| -> u32 {
                value.size_bytes.max(min_weight).min(u32::MAX as u64) as u32
            })
            .expire_after(PerEntryTtl)
            .eviction_listener(
                move |key: Arc<String>, value: Arc<CacheEntry>, cause: RemovalCause| {
                    evicted_bytes.fetch_sub(value.size_bytes, Ordering::AcqRel);
                    if cause == RemovalCause::Size {
                        debug!(key = %key, "cache entry evicted for capacity");
                    }
                },
            )
            .support_invalidation_closures()
            .build();

        Self {
            entries,
            default_ttl,
            memory_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            lookup_micros: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.default_ttl_seconds),
            settings.max_entries,
            settings.memory_limit_bytes,
        )
    }

    /// Look up `key`. Expired entries are never returned.
    pub async fn get(&self, key: &str) -> Option<Vec<SearchResult>> {
        let started = Instant::now();
        let now = Utc::now();
        let found = match self.entries.get(key).await {
            Some(entry) if entry.is_expired(now) => {
                self.entries.invalidate(key).await;
                None
            }
            Some(entry) => {
                entry.touch(now);
                Some(entry.results.clone())
            }
            None => None,
        };

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.lookup_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        debug!(key, hit = found.is_some(), "cache lookup");
        found
    }

    /// Store `results` under `key`; `None` uses the default TTL.
    ///
    /// A zero TTL stores nothing.
    pub async fn set(&self, key: impl Into<String>, results: Vec<SearchResult>, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return;
        }
        let key = key.into();
        let entry = Arc::new(CacheEntry::new(key.clone(), results, ttl));
        self.memory_bytes
            .fetch_add(entry.size_bytes, Ordering::AcqRel);
        self.entries.insert(key, entry).await;
    }

    /// Remove entries whose key matches `pattern`.
    ///
    /// `""` and `"*"` clear everything; otherwise `*` matches any run of
    /// characters, e.g. `index:*`.
    pub fn invalidate(&self, pattern: &str) {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern == "*" {
            self.entries.invalidate_all();
            debug!("cache cleared");
            return;
        }

        let regex = match glob_to_regex(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(pattern, error = %e, "invalid invalidation pattern, ignoring");
                return;
            }
        };
        if let Err(e) = self
            .entries
            .invalidate_entries_if(move |key, _| regex.is_match(key))
        {
            warn!(pattern, error = %e, "cache invalidation failed");
        }
    }

    pub async fn statistics(&self) -> CacheStatistics {
        self.entries.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let (hit_rate, avg_response_time_ms) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                hits as f64 / total_requests as f64,
                self.lookup_micros.load(Ordering::Relaxed) as f64 / total_requests as f64 / 1000.0,
            )
        };

        CacheStatistics {
            total_requests,
            hits,
            misses,
            hit_rate,
            current_entries: self.entries.entry_count(),
            memory_usage_bytes: self.memory_bytes.load(Ordering::Acquire),
            avg_response_time_ms,
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    regex::Regex::new(&format!("^{}$", escaped))
}
