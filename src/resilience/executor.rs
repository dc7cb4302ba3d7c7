//! Resilience executor: circuit-breaker(retry(operation)) with optional fallback

use super::circuit::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::retry::RetryPolicy;
use crate::config::ResilienceSettings;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use futures::future::Ready;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, warn};

/// How one completed primary path affects the circuit
enum Verdict {
    Healthy,
    Unhealthy,
    Abandoned,
}

impl Verdict {
    fn of<T>(outcome: &Result<T>) -> Self {
        match outcome {
            Ok(_) => Self::Healthy,
            Err(Error::Cancelled) => Self::Abandoned,
            Err(err) if err.is_transient() || err.is_circuit_open() => Self::Unhealthy,
            // The dependency answered; the request itself was bad.
            Err(_) => Self::Healthy,
        }
    }
}

struct DependencyPolicy {
    retry: RetryPolicy,
    breaker: Mutex<CircuitBreaker>,
}

impl DependencyPolicy {
    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission held while a primary path runs.
///
/// Dropping it without a verdict (cancelled, or the caller dropped the future
/// mid-call) gives a half-open trial slot back to the breaker.
struct AdmissionGuard<'a> {
    policy: &'a DependencyPolicy,
    admission: Admission,
    settled: bool,
}

impl<'a> AdmissionGuard<'a> {
    fn new(policy: &'a DependencyPolicy, admission: Admission) -> Self {
        Self {
            policy,
            admission,
            settled: false,
        }
    }

    /// Hand the admission over for a recorded verdict
    fn settle(mut self) -> Admission {
        self.settled = true;
        self.admission
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.policy.breaker().release(self.admission);
        }
    }
}

type NoFallback<T> = fn() -> Ready<Result<T>>;

/// Wraps async operations with per-dependency retry, circuit breaking and fallback.
///
/// Circuit state for a dependency is only ever mutated under that dependency's
/// lock, so concurrent callers see a single linearizable sequence of transitions.
pub struct ResilienceExecutor {
    policies: HashMap<String, DependencyPolicy>,
    metrics: Arc<Metrics>,
}

impl ResilienceExecutor {
    /// Executor with no registered dependencies
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            policies: HashMap::new(),
            metrics,
        }
    }

    /// Register every dependency listed under `resilience.circuit_breakers`
    pub fn from_settings(settings: &ResilienceSettings, metrics: Arc<Metrics>) -> Self {
        let retry = RetryPolicy::from(&settings.retry);
        settings
            .circuit_breakers
            .iter()
            .fold(Self::new(metrics), |executor, (name, breaker)| {
                executor.register(name.clone(), retry.clone(), CircuitBreakerConfig::from(breaker))
            })
    }

    pub fn register(
        mut self,
        dependency: impl Into<String>,
        retry: RetryPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        self.policies.insert(
            dependency.into(),
            DependencyPolicy {
                retry,
                breaker: Mutex::new(CircuitBreaker::new(breaker)),
            },
        );
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run `operation` under the dependency's policy; failures propagate
    pub async fn execute<T, Op, Fut>(
        &self,
        dependency: &str,
        ctx: &RequestContext,
        operation: Op,
    ) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(dependency, ctx, operation, None::<NoFallback<T>>)
            .await
    }

    /// Run `operation`; if it fails for any reason other than cancellation
    /// (including an open circuit), return `fallback`'s result instead
    pub async fn execute_with_fallback<T, Op, Fut, Fb, FbFut>(
        &self,
        dependency: &str,
        ctx: &RequestContext,
        operation: Op,
        fallback: Fb,
    ) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T>>,
    {
        self.run(dependency, ctx, operation, Some(fallback)).await
    }

    /// Variant for operations without a result value
    pub async fn execute_action<Op, Fut>(
        &self,
        dependency: &str,
        ctx: &RequestContext,
        operation: Op,
    ) -> Result<()>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.execute(dependency, ctx, operation).await
    }

    /// Current state of a registered dependency's circuit
    pub fn circuit_state(&self, dependency: &str) -> Option<CircuitState> {
        self.policies
            .get(dependency)
            .map(|policy| policy.breaker().state_at(Instant::now()))
    }

    /// Circuit state of every registered dependency
    pub fn health_status(&self) -> BTreeMap<String, CircuitState> {
        let now = Instant::now();
        self.policies
            .iter()
            .map(|(name, policy)| (name.clone(), policy.breaker().state_at(now)))
            .collect()
    }

    async fn run<T, Op, Fut, Fb, FbFut>(
        &self,
        dependency: &str,
        ctx: &RequestContext,
        mut operation: Op,
        fallback: Option<Fb>,
    ) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        Fb: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T>>,
    {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let primary = match self.policies.get(dependency) {
            None => {
                warn!(
                    dependency,
                    "no resilience policy registered, executing without retry or circuit breaker"
                );
                ctx.guard(operation()).await
            }
            Some(policy) => self.run_guarded(dependency, policy, ctx, &mut operation).await,
        };

        match primary {
            Ok(value) => Ok(value),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => match fallback {
                Some(fallback) => {
                    warn!(dependency, error = %err, "primary path failed, using fallback");
                    self.metrics.record_fallback(dependency);
                    ctx.guard(fallback()).await.map_err(|fallback_err| {
                        error!(dependency, error = %fallback_err, "fallback failed");
                        fallback_err
                    })
                }
                None => Err(err),
            },
        }
    }

    async fn run_guarded<T, Op, Fut>(
        &self,
        dependency: &str,
        policy: &DependencyPolicy,
        ctx: &RequestContext,
        operation: &mut Op,
    ) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = policy.breaker().try_acquire(Instant::now());
        if admission == Admission::Rejected {
            debug!(dependency, "circuit open, failing fast");
            self.metrics.record_short_circuit(dependency);
            return Err(Error::CircuitOpen {
                dependency: dependency.to_string(),
            });
        }
        if admission == Admission::Trial {
            debug!(dependency, "circuit half-open, sending trial call");
        }

        let guard = AdmissionGuard::new(policy, admission);
        let started = Instant::now();
        let outcome = retry_loop(dependency, &policy.retry, ctx, operation).await;
        let now = Instant::now();

        match Verdict::of(&outcome) {
            Verdict::Healthy => {
                let admission = guard.settle();
                let mut breaker = policy.breaker();
                breaker.record_success(admission, now);
                self.metrics.record_call(dependency, now - started, true);
                if admission == Admission::Trial {
                    warn!(dependency, "trial call succeeded, circuit closed");
                }
            }
            Verdict::Unhealthy => {
                let admission = guard.settle();
                let mut breaker = policy.breaker();
                let before = breaker.state_at(now);
                breaker.record_failure(admission, now);
                let after = breaker.state_at(now);
                drop(breaker);
                self.metrics.record_call(dependency, now - started, false);
                if before != CircuitState::Open && after == CircuitState::Open {
                    warn!(dependency, "circuit opened");
                }
            }
            Verdict::Abandoned => drop(guard),
        }

        outcome
    }
}

/// Attempt `operation` up to `max_retries + 1` times, retrying transient failures only
async fn retry_loop<T, Op, Fut>(
    dependency: &str,
    retry: &RetryPolicy,
    ctx: &RequestContext,
    operation: &mut Op,
) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match ctx.guard(operation()).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(dependency, attempt, "recovered after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt <= retry.max_retries => {
                let delay = retry.delay_for(attempt);
                warn!(
                    dependency,
                    attempt,
                    max_retries = retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                ctx.guard(async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
            Err(err) => return Err(err),
        }
    }
}
