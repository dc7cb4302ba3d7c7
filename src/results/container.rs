//! Result container for aggregating and deduplicating results across sub-queries

use super::types::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Container for aggregating results from concurrent dispatches.
///
/// Clones share the same storage, so each dispatch can add its results as soon
/// as it completes.
#[derive(Debug, Clone, Default)]
pub struct ResultContainer {
    /// Dedup key -> best result seen so far
    results_map: Arc<RwLock<HashMap<String, SearchResult>>>,
    failures: Arc<RwLock<Vec<BackendFailure>>>,
    degradations: Arc<RwLock<Vec<Degradation>>>,
    timings: Arc<RwLock<Vec<DispatchTiming>>>,
}

impl ResultContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result; on a duplicate key the higher score wins
    pub fn add_result(&self, result: SearchResult) {
        let key = result.dedup_key().to_string();
        let mut map = write(&self.results_map);
        let keep_existing = map
            .get(&key)
            .is_some_and(|existing| existing.relevance_score >= result.relevance_score);
        if !keep_existing {
            map.insert(key, result);
        }
    }

    pub fn extend_results(&self, results: impl IntoIterator<Item = SearchResult>) {
        for result in results {
            self.add_result(result);
        }
    }

    pub fn add_failure(&self, failure: BackendFailure) {
        write(&self.failures).push(failure);
    }

    pub fn add_degradation(&self, degradation: Degradation) {
        let mut degradations = write(&self.degradations);
        if !degradations.contains(&degradation) {
            degradations.push(degradation);
        }
    }

    pub fn add_timing(&self, timing: DispatchTiming) {
        write(&self.timings).push(timing);
    }

    /// All results ordered by relevance, credibility as tie-break
    pub fn ordered_results(&self) -> Vec<SearchResult> {
        let mut results: Vec<SearchResult> = read(&self.results_map).values().cloned().collect();
        sort_by_relevance(&mut results);
        results
    }

    /// Ordered results at or above `min_score`, capped at `max_results`
    pub fn top_results(&self, min_score: f64, max_results: usize) -> Vec<SearchResult> {
        self.ordered_results()
            .into_iter()
            .filter(|r| r.relevance_score >= min_score)
            .take(max_results)
            .collect()
    }

    pub fn failures(&self) -> Vec<BackendFailure> {
        read(&self.failures).clone()
    }

    pub fn degradations(&self) -> Vec<Degradation> {
        read(&self.degradations).clone()
    }

    pub fn timings(&self) -> Vec<DispatchTiming> {
        read(&self.timings).clone()
    }

    pub fn result_count(&self) -> usize {
        read(&self.results_map).len()
    }
}

/// Deduplicate a single result set, keeping the higher score per key
pub fn deduplicate(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let container = ResultContainer::new();
    container.extend_results(results);
    container.ordered_results()
}

/// Relevance descending, then credibility descending, then id for stability
pub fn sort_by_relevance(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.credibility()
                    .unwrap_or(0.0)
                    .partial_cmp(&a.credibility().unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_result(id: &str, doc: &str, score: f64) -> SearchResult {
        SearchResult::new(
            id,
            format!("content of {}", id),
            score,
            SearchSource::new(BackendKind::Index, "docs").with_document_id(doc),
        )
    }

    fn web_result(id: &str, score: f64, credibility: f64) -> SearchResult {
        SearchResult::new(id, "web", score, SearchSource::new(BackendKind::WebAugmentation, "w"))
            .with_metadata(metadata_keys::CREDIBILITY, credibility)
    }

    #[test]
    fn test_result_deduplication() {
        let container = ResultContainer::new();
        container.add_result(index_result("a", "doc-1", 0.4));
        container.add_result(index_result("b", "doc-1", 0.8));
        container.add_result(index_result("c", "doc-1", 0.6));

        assert_eq!(container.result_count(), 1);
        let results = container.ordered_results();
        assert_eq!(results[0].id, "b");
        assert_eq!(results[0].relevance_score, 0.8);
    }

    #[test]
    fn test_merge_with_itself_is_idempotent() {
        let set = vec![
            index_result("a", "doc-1", 0.9),
            index_result("b", "doc-2", 0.7),
            web_result("w1", 0.5, 0.9),
        ];
        let container = ResultContainer::new();
        container.extend_results(set.clone());
        let once = container.ordered_results();
        container.extend_results(set);
        let twice = container.ordered_results();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 3);
    }

    #[test]
    fn test_result_ordering() {
        let container = ResultContainer::new();
        container.add_result(web_result("low-cred", 0.7, 0.6));
        container.add_result(index_result("top", "doc-1", 0.9));
        container.add_result(web_result("high-cred", 0.7, 0.95));

        let ids: Vec<_> = container.ordered_results().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["top", "high-cred", "low-cred"]);
    }

    #[test]
    fn test_top_results_applies_floor_and_cap() {
        let container = ResultContainer::new();
        container.add_result(index_result("a", "doc-1", 0.9));
        container.add_result(index_result("b", "doc-2", 0.7));
        container.add_result(index_result("c", "doc-3", 0.3));

        let top = container.top_results(0.5, 5);
        let scores: Vec<_> = top.iter().map(|r| r.relevance_score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);

        assert_eq!(container.top_results(0.0, 1).len(), 1);
    }

    #[test]
    fn test_degradations_are_unique() {
        let container = ResultContainer::new();
        let degradation = Degradation {
            backend: BackendKind::Index,
            reason: "embedding failed".to_string(),
        };
        container.add_degradation(degradation.clone());
        container.add_degradation(degradation);
        assert_eq!(container.degradations().len(), 1);
    }
}
