//! Metrics collection module
//!
//! Tracks per-dependency call outcomes, latencies, fallbacks and short-circuits.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Number of latency samples kept per dependency
const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct DependencyCounters {
    successes: u64,
    failures: u64,
    fallbacks: u64,
    short_circuits: u64,
    latencies_ms: VecDeque<u64>,
}

/// Shared metrics collector
pub struct Metrics {
    /// Total orchestrated searches
    total_searches: AtomicU64,
    dependencies: RwLock<HashMap<String, DependencyCounters>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_searches: AtomicU64::new(0),
            dependencies: RwLock::new(HashMap::new()),
        }
    }

    pub fn inc_search(&self) {
        self.total_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_searches(&self) -> u64 {
        self.total_searches.load(Ordering::Relaxed)
    }

    /// Record a completed primary call
    pub fn record_call(&self, dependency: &str, elapsed: Duration, success: bool) {
        self.update(dependency, |c| {
            if success {
                c.successes += 1;
            } else {
                c.failures += 1;
            }
            if c.latencies_ms.len() >= LATENCY_WINDOW {
                c.latencies_ms.pop_front();
            }
            c.latencies_ms.push_back(elapsed.as_millis() as u64);
        });
    }

    pub fn record_fallback(&self, dependency: &str) {
        self.update(dependency, |c| c.fallbacks += 1);
    }

    pub fn record_short_circuit(&self, dependency: &str) {
        self.update(dependency, |c| c.short_circuits += 1);
    }

    /// Average latency over the retained window
    pub fn avg_response_time(&self, dependency: &str) -> Option<u64> {
        let deps = self.dependencies.read().unwrap_or_else(PoisonError::into_inner);
        deps.get(dependency).and_then(|c| average(&c.latencies_ms))
    }

    /// Percentage of primary calls that succeeded
    pub fn reliability(&self, dependency: &str) -> f64 {
        let deps = self.dependencies.read().unwrap_or_else(PoisonError::into_inner);
        deps.get(dependency)
            .map(|c| reliability(c.successes, c.failures))
            .unwrap_or(100.0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, DependencyStats> {
        let deps = self.dependencies.read().unwrap_or_else(PoisonError::into_inner);
        deps.iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    DependencyStats {
                        successes: c.successes,
                        failures: c.failures,
                        fallbacks: c.fallbacks,
                        short_circuits: c.short_circuits,
                        avg_response_time_ms: average(&c.latencies_ms),
                        reliability: reliability(c.successes, c.failures),
                    },
                )
            })
            .collect()
    }

    fn update(&self, dependency: &str, f: impl FnOnce(&mut DependencyCounters)) {
        let mut deps = self.dependencies.write().unwrap_or_else(PoisonError::into_inner);
        f(deps.entry(dependency.to_string()).or_default());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn average(samples: &VecDeque<u64>) -> Option<u64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<u64>() / samples.len() as u64)
    }
}

fn reliability(successes: u64, failures: u64) -> f64 {
    let total = successes + failures;
    if total == 0 {
        100.0
    } else {
        (successes as f64 / total as f64) * 100.0
    }
}

/// Statistics for a single dependency
#[derive(Debug, Clone, Serialize)]
pub struct DependencyStats {
    pub successes: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub short_circuits: u64,
    pub avg_response_time_ms: Option<u64>,
    pub reliability: f64,
}
